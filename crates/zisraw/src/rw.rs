//! In-place editing of an existing document.
//!
//! Segments are replaced in place when the new content fits the existing
//! allocation (the allocation is kept, so free space survives); otherwise
//! the new segment goes to the end of the file and the old one's magic is
//! overwritten with `DELETED`. Directories are rewritten on close only when
//! something changed.
//!
//! The engine is not thread-safe: all mutation goes through `&mut self`.

use tracing::{debug, instrument};

use crate::attachment::{
	parse_attachment_directory, read_attachment_segment, Attachment, AttachmentEntry,
	RwAttachmentDirectory,
};
use crate::directory::{
	parse_subblock_directory, ParseOptions, PyramidStatistics, SubBlockEntry, SubBlockStatistics,
};
use crate::encode::segments::{
	mark_segment_deleted, write_attachment_directory_segment, write_attachment_segment,
	write_metadata_segment, write_subblock_directory_segment, write_subblock_segment, Payload,
	SegmentWrite, SubBlockPayload,
};
use crate::encode::{AddAttachmentInfo, AddSubBlockInfo, WriteMetadataInfo, FIRST_SEGMENT_POS};
use crate::error::{Error, ReaderWriteError, Result};
use crate::guid::Guid;
use crate::header::{read_file_header, write_file_header, FileHeaderSegmentData};
use crate::metadata::{read_metadata_segment, MetadataSegment};
use crate::segment::read_segment_header_any;
use crate::stream::ReadWriteStream;
use crate::subblock::{read_subblock_segment, SubBlock};

/// Options for [`ReaderWriter::open`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ReaderWriterOptions {
	/// Replace the file GUID with a fresh one on open.
	pub force_new_file_guid: bool,
	/// Checks applied while parsing the sub-block directory.
	pub parse_options: ParseOptions,
}

/// A CZI document opened for in-place editing.
pub struct ReaderWriter<S> {
	stream: Option<S>,
	header: FileHeaderSegmentData,
	subblocks: crate::directory::RwSubBlockDirectory,
	attachments: RwAttachmentDirectory,
	subblock_directory_segment: Option<SegmentWrite>,
	attachment_directory_segment: Option<SegmentWrite>,
	metadata_segment: Option<SegmentWrite>,
	next_segment_pos: Option<u64>,
	header_dirty: bool,
}

impl<S: ReadWriteStream> ReaderWriter<S> {
	/// Open an existing document, or initialise a fresh one if the stream is
	/// empty.
	#[instrument(level = "debug", skip(stream, options))]
	pub fn open(mut stream: S, options: &ReaderWriterOptions) -> Result<Self> {
		let header = match read_file_header(&mut stream) {
			Ok(header) => Some(header),
			// an empty stream is a fresh document, not an error
			Err(Error::NotEnoughData { got: 0, .. }) => None,
			Err(err) => return Err(err),
		};

		let mut rw = match header {
			None => {
				let guid = Guid::generate();
				let header = FileHeaderSegmentData::new(guid, guid);
				write_file_header(&mut stream, &header)?;
				Self {
					stream: Some(stream),
					header,
					subblocks: Default::default(),
					attachments: Default::default(),
					subblock_directory_segment: None,
					attachment_directory_segment: None,
					metadata_segment: None,
					next_segment_pos: Some(FIRST_SEGMENT_POS),
					header_dirty: false,
				}
			}
			Some(mut header) => {
				if options.force_new_file_guid {
					let guid = Guid::generate();
					header.primary_file_guid = guid;
					header.file_guid = guid;
					write_file_header(&mut stream, &header)?;
				}

				let mut rw = Self {
					stream: Some(stream),
					header,
					subblocks: Default::default(),
					attachments: Default::default(),
					subblock_directory_segment: None,
					attachment_directory_segment: None,
					metadata_segment: None,
					next_segment_pos: None,
					header_dirty: false,
				};
				rw.load_directories(&options.parse_options)?;
				rw
			}
		};

		rw.probe_metadata_segment()?;
		debug!(
			subblocks = rw.subblocks.len(),
			attachments = rw.attachments.len(),
			"opened document for editing"
		);
		Ok(rw)
	}

	fn load_directories(&mut self, options: &ParseOptions) -> Result<()> {
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;

		if let Some(position) = self.header.subblock_directory() {
			let subblocks = &mut self.subblocks;
			let header = parse_subblock_directory(stream, position, options, |entry| {
				subblocks.populate(entry);
				Ok(())
			})?;
			self.subblock_directory_segment = Some(SegmentWrite {
				position,
				allocated: header.allocated_size as u64,
				used: header.used_size as u64,
			});
		}

		if let Some(position) = self.header.attachment_directory() {
			let attachments = &mut self.attachments;
			let header = parse_attachment_directory(stream, position, |entry| {
				attachments.populate(entry);
				Ok(())
			})?;
			self.attachment_directory_segment = Some(SegmentWrite {
				position,
				allocated: header.allocated_size as u64,
				used: header.used_size as u64,
			});
		}

		Ok(())
	}

	fn probe_metadata_segment(&mut self) -> Result<()> {
		let Some(position) = self.header.metadata() else {
			return Ok(());
		};
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let (_, header) = read_segment_header_any(stream, position)?;
		self.metadata_segment = Some(SegmentWrite {
			position,
			allocated: header.allocated_size as u64,
			used: header.used_size as u64,
		});
		Ok(())
	}

	/// Lazily determine where the next appended segment goes: after the last
	/// known segment.
	fn next_segment_pos(&mut self) -> Result<u64> {
		if let Some(pos) = self.next_segment_pos {
			return Ok(pos);
		}

		let mut last: Option<u64> = None;
		let mut consider = |position: Option<u64>| {
			if let Some(position) = position {
				last = Some(last.map_or(position, |l| l.max(position)));
			}
		};
		consider(self.subblock_directory_segment.map(|s| s.position));
		consider(self.attachment_directory_segment.map(|s| s.position));
		consider(self.metadata_segment.map(|s| s.position));
		for entry in self.subblocks.entries() {
			consider(Some(entry.file_position));
		}
		for entry in self.attachments.entries() {
			consider(Some(entry.file_position));
		}

		let next = match last {
			None => FIRST_SEGMENT_POS,
			Some(position) => {
				let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
				let (_, header) = read_segment_header_any(stream, position)?;
				position + crate::constants::SIZE_SEGMENT_HEADER + header.allocated_size as u64
			}
		};
		self.next_segment_pos = Some(next);
		Ok(next)
	}

	// ---- read side -------------------------------------------------------

	/// The file header as currently in memory.
	pub fn file_header(&self) -> &FileHeaderSegmentData {
		&self.header
	}

	/// The directory entry under `key`.
	pub fn get_subblock_info(&self, key: i32) -> Option<SubBlockEntry> {
		self.subblocks.get(key).cloned()
	}

	/// Enumerate `(key, entry)` pairs of the sub-block directory.
	pub fn enumerate_subblocks(&self, func: &mut dyn FnMut(i32, &SubBlockEntry) -> bool) {
		for (key, entry) in self.subblocks.iter() {
			if !func(key, entry) {
				break;
			}
		}
	}

	/// Read the sub-block under `key`.
	pub fn read_subblock(&mut self, key: i32) -> Result<SubBlock> {
		let entry = self
			.subblocks
			.get(key)
			.cloned()
			.ok_or(ReaderWriteError::InvalidSubBlkId("ReadSubBlock"))?;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		read_subblock_segment(stream, entry.file_position, Some(&entry), false)
	}

	/// The attachment entry under `key`.
	pub fn get_attachment_info(&self, key: i32) -> Option<AttachmentEntry> {
		self.attachments.get(key).cloned()
	}

	/// Enumerate `(key, entry)` pairs of the attachment directory.
	pub fn enumerate_attachments(&self, func: &mut dyn FnMut(i32, &AttachmentEntry) -> bool) {
		for (key, entry) in self.attachments.iter() {
			if !func(key, entry) {
				break;
			}
		}
	}

	/// Read the attachment under `key`.
	pub fn read_attachment(&mut self, key: i32) -> Result<Attachment> {
		let entry = self
			.attachments
			.get(key)
			.cloned()
			.ok_or(ReaderWriteError::InvalidAttachmentId("ReadAttachment"))?;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		read_attachment_segment(stream, entry.file_position)
	}

	/// Read the metadata segment.
	pub fn read_metadata(&mut self) -> Result<MetadataSegment> {
		let segment = self
			.metadata_segment
			.ok_or(Error::SegmentNotPresent("metadata"))?;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		read_metadata_segment(stream, segment.position)
	}

	/// Aggregate statistics over the sub-block directory.
	pub fn statistics(&mut self) -> SubBlockStatistics {
		self.subblocks.statistics().clone()
	}

	/// Consolidated pyramid statistics.
	pub fn pyramid_statistics(&mut self) -> PyramidStatistics {
		self.subblocks.pyramid_statistics().clone()
	}

	// ---- mutation --------------------------------------------------------

	/// Append a new sub-block, returning its key.
	#[instrument(level = "debug", skip(self, info, payload))]
	pub fn add_subblock(
		&mut self,
		info: &AddSubBlockInfo,
		payload: SubBlockPayload<'_>,
	) -> Result<i32> {
		info.validate()?;

		let next = self.next_segment_pos()?;
		let entry = info.to_entry(next);
		if self.subblocks.entries().any(|e| e.same_slot(&entry)) {
			return Err(ReaderWriteError::AddCoordinateAlreadyExisting.into());
		}

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write = write_subblock_segment(stream, next, &entry, payload, None)?;
		self.next_segment_pos = Some(write.end());

		let key = self
			.subblocks
			.try_add(entry)
			.ok_or(Error::InternalError("sub-block slot vanished during add"))?;
		self.header_dirty = true;
		Ok(key)
	}

	/// Replace the sub-block under `key` with new content.
	#[instrument(level = "debug", skip(self, info, payload))]
	pub fn replace_subblock(
		&mut self,
		key: i32,
		info: &AddSubBlockInfo,
		payload: SubBlockPayload<'_>,
	) -> Result<()> {
		let existing = self
			.subblocks
			.get(key)
			.cloned()
			.ok_or(ReaderWriteError::InvalidSubBlkId("ReplaceSubBlock"))?;

		let next = self.next_segment_pos()?;
		let mut entry = info.to_entry(existing.file_position);
		let used = payload.used_size(&entry);

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let (_, existing_header) = read_segment_header_any(stream, existing.file_position)?;

		if existing_header.allocated_size as u64 >= used {
			// fits: rewrite in place, keeping the existing allocation
			write_subblock_segment(
				stream,
				existing.file_position,
				&entry,
				payload,
				Some(existing_header.allocated_size as u64),
			)?;
		} else {
			entry.file_position = next;
			let write = write_subblock_segment(stream, next, &entry, payload, None)?;
			mark_segment_deleted(stream, existing.file_position)?;
			self.next_segment_pos = Some(write.end());
		}

		self.subblocks.try_modify(key, entry);
		Ok(())
	}

	/// Remove the sub-block under `key`, marking its segment deleted.
	#[instrument(level = "debug", skip(self))]
	pub fn remove_subblock(&mut self, key: i32) -> Result<()> {
		let entry = self
			.subblocks
			.try_remove(key)
			.ok_or(ReaderWriteError::InvalidSubBlkId("RemoveSubBlock"))?;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		mark_segment_deleted(stream, entry.file_position)?;
		Ok(())
	}

	/// Append a new attachment, returning its key.
	#[instrument(level = "debug", skip(self, info, data))]
	pub fn add_attachment(
		&mut self,
		info: &AddAttachmentInfo,
		data: Payload<'_>,
		data_size: u64,
	) -> Result<i32> {
		let next = self.next_segment_pos()?;
		let entry = info.to_entry(next);
		if self.attachments.entries().any(|e| e.key() == entry.key()) {
			return Err(ReaderWriteError::AddAttachmentAlreadyExisting.into());
		}

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write = write_attachment_segment(stream, next, &entry, data, data_size, None)?;
		self.next_segment_pos = Some(write.end());

		let key = self
			.attachments
			.try_add(entry)
			.ok_or(Error::InternalError("attachment key vanished during add"))?;
		self.header_dirty = true;
		Ok(key)
	}

	/// Replace the attachment under `key` with new content.
	#[instrument(level = "debug", skip(self, info, data))]
	pub fn replace_attachment(
		&mut self,
		key: i32,
		info: &AddAttachmentInfo,
		data: Payload<'_>,
		data_size: u64,
	) -> Result<()> {
		let existing = self
			.attachments
			.get(key)
			.cloned()
			.ok_or(ReaderWriteError::InvalidAttachmentId("ReplaceAttachment"))?;

		let next = self.next_segment_pos()?;
		let mut entry = info.to_entry(existing.file_position);
		let used = crate::constants::SIZE_ATTACHMENT_DATA + data_size;

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let (_, existing_header) = read_segment_header_any(stream, existing.file_position)?;

		if existing_header.allocated_size as u64 >= used {
			write_attachment_segment(
				stream,
				existing.file_position,
				&entry,
				data,
				data_size,
				Some(existing_header.allocated_size as u64),
			)?;
		} else {
			entry.file_position = next;
			let write = write_attachment_segment(stream, next, &entry, data, data_size, None)?;
			mark_segment_deleted(stream, existing.file_position)?;
			self.next_segment_pos = Some(write.end());
		}

		self.attachments.try_modify(key, entry);
		Ok(())
	}

	/// Remove the attachment under `key`, marking its segment deleted.
	#[instrument(level = "debug", skip(self))]
	pub fn remove_attachment(&mut self, key: i32) -> Result<()> {
		let entry = self
			.attachments
			.try_remove(key)
			.ok_or(ReaderWriteError::InvalidAttachmentId("RemoveAttachment"))?;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		mark_segment_deleted(stream, entry.file_position)?;
		Ok(())
	}

	/// Write (or replace) the metadata segment.
	#[instrument(level = "debug", skip(self, info))]
	pub fn write_metadata(&mut self, info: &WriteMetadataInfo<'_>) -> Result<()> {
		let used = crate::constants::SIZE_METADATA_DATA
			+ info.xml.len() as u64
			+ info.attachment.map_or(0, |a| a.len() as u64);

		let next = self.next_segment_pos()?;
		let existing = self.metadata_segment;
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;

		let write = match existing {
			Some(segment) if segment.allocated >= used => write_metadata_segment(
				stream,
				segment.position,
				info.xml,
				info.attachment,
				Some(segment.allocated),
			)?,
			_ => {
				let write =
					write_metadata_segment(stream, next, info.xml, info.attachment, None)?;
				if let Some(segment) = existing {
					mark_segment_deleted(stream, segment.position)?;
				}

				self.next_segment_pos = Some(write.end());
				write
			}
		};

		if self.header.metadata_position != write.position as i64 {
			self.header.metadata_position = write.position as i64;
			self.header_dirty = true;
		}
		self.metadata_segment = Some(write);
		Ok(())
	}

	/// Rewrite dirty directories and the file header, then hand the stream
	/// back.
	///
	/// Consumes the engine.
	#[instrument(level = "debug", skip(self))]
	pub fn close(mut self) -> Result<S> {
		self.finish()?;
		self.stream.take().ok_or(Error::NotOperational)
	}

	fn finish(&mut self) -> Result<()> {
		if self.subblocks.is_modified() {
			let write = self.rewrite_directory_segment(
				self.subblock_directory_segment,
				DirectoryKind::SubBlock,
			)?;
			self.subblock_directory_segment = Some(write);
			if self.header.subblock_directory_position != write.position as i64 {
				self.header.subblock_directory_position = write.position as i64;
			}
			self.header_dirty = true;
			self.subblocks.set_modified(false);
		}

		if self.attachments.is_modified() {
			let write = self.rewrite_directory_segment(
				self.attachment_directory_segment,
				DirectoryKind::Attachment,
			)?;
			self.attachment_directory_segment = Some(write);
			if self.header.attachment_directory_position != write.position as i64 {
				self.header.attachment_directory_position = write.position as i64;
			}
			self.header_dirty = true;
			self.attachments.set_modified(false);
		}

		if self.header_dirty {
			let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
			write_file_header(stream, &self.header)?;
			self.header_dirty = false;
		}

		Ok(())
	}

	/// Rewrite a directory segment with the existing-fits policy.
	fn rewrite_directory_segment(
		&mut self,
		existing: Option<SegmentWrite>,
		kind: DirectoryKind,
	) -> Result<SegmentWrite> {
		let next = self.next_segment_pos()?;

		let write_at = |rw: &mut Self, position: u64, allocated: Option<u64>| {
			let stream = rw.stream.as_mut().ok_or(Error::NotOperational)?;
			match kind {
				DirectoryKind::SubBlock => write_subblock_directory_segment(
					stream,
					position,
					rw.subblocks.entries(),
					allocated,
				),
				DirectoryKind::Attachment => write_attachment_directory_segment(
					stream,
					position,
					rw.attachments.entries(),
					allocated,
				),
			}
		};

		if let Some(segment) = existing {
			match write_at(self, segment.position, Some(segment.allocated)) {
				Ok(write) => return Ok(write),
				Err(Error::InternalError(_)) => {}
				Err(other) => return Err(other),
			}
		}

		let write = write_at(self, next, None)?;
		self.next_segment_pos = Some(write.end());
		if let Some(segment) = existing {
			let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
			mark_segment_deleted(stream, segment.position)?;
		}

		Ok(write)
	}
}

#[derive(Clone, Copy, Debug)]
enum DirectoryKind {
	SubBlock,
	Attachment,
}

impl<S> std::fmt::Debug for ReaderWriter<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReaderWriter")
			.field("subblocks", &self.subblocks.len())
			.field("attachments", &self.attachments.len())
			.field("next_segment_pos", &self.next_segment_pos)
			.finish()
	}
}
