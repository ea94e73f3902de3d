//! The sequential writer: create a new CZI document, append sub-blocks and
//! attachments, finalise the directories on close.
//!
//! The writer is a state machine over `next_segment_pos`: every added
//! segment is serialised there and advances it. `close` emits the sub-block
//! directory, the attachment directory (if any attachments were added), and
//! rewrites the file header with the final positions. Space for the
//! directories and the metadata segment can be reserved up front so that
//! later in-place edits find room.

use tracing::{debug, instrument};

use crate::attachment::{AttachmentEntry, WriterAttachmentDirectory};
use crate::constants::{SIZE_FILE_HEADER_DATA, SIZE_SEGMENT_HEADER};
use crate::coordinate::{Coordinate, DimBounds};
use crate::directory::{SubBlockEntry, WriterSubBlockDirectory};
use crate::error::{Error, Result, WriteError};
use crate::guid::Guid;
use crate::header::{write_file_header, FileHeaderSegmentData};
use crate::pixel::PixelType;
use crate::stream::WriteStream;

pub mod segments;

pub use segments::{Payload, PayloadSource, SegmentWrite, SubBlockPayload};

use segments::{
	mark_segment_deleted, write_attachment_directory_segment, write_attachment_segment,
	write_metadata_segment, write_reservation, write_subblock_directory_segment,
	write_subblock_segment,
};

/// Offset of the first segment after the file header.
pub(crate) const FIRST_SEGMENT_POS: u64 = SIZE_SEGMENT_HEADER + SIZE_FILE_HEADER_DATA;

/// Parameters for creating a new document.
#[derive(Clone, Debug, Default)]
pub struct WriterInfo {
	/// File GUID; a fresh one is generated when `None`.
	pub file_guid: Option<Guid>,
	/// Declared bounds; added sub-blocks are validated against them.
	pub dim_bounds: Option<DimBounds>,
	/// Declared inclusive M-index bounds.
	pub m_index_bounds: Option<(i32, i32)>,
	/// Reserve this many data bytes for the metadata segment.
	pub reserved_metadata_size: Option<u64>,
	/// Reserve this many data bytes for the sub-block directory.
	pub reserved_subblock_directory_size: Option<u64>,
	/// Reserve this many data bytes for the attachment directory.
	pub reserved_attachment_directory_size: Option<u64>,
	/// Allow two sub-blocks with the same (coordinate, M) slot.
	pub allow_duplicate_subblocks: bool,
}

/// Description of a sub-block to add.
#[derive(Clone, Debug)]
pub struct AddSubBlockInfo {
	/// Plane coordinate.
	pub coordinate: Coordinate,
	/// M index, `None` for none.
	pub m_index: Option<i32>,
	/// Logical X.
	pub x: i32,
	/// Logical Y.
	pub y: i32,
	/// Logical width.
	pub logical_width: i32,
	/// Logical height.
	pub logical_height: i32,
	/// Stored width.
	pub physical_width: i32,
	/// Stored height.
	pub physical_height: i32,
	/// Pixel type.
	pub pixel_type: PixelType,
	/// Raw compression mode of the supplied data.
	pub compression_mode_raw: i32,
	/// Legacy pyramid-type byte, usually 0.
	pub pyramid_type_byte: u8,
}

impl AddSubBlockInfo {
	pub(crate) fn to_entry(&self, file_position: u64) -> SubBlockEntry {
		SubBlockEntry {
			coordinate: self.coordinate.clone(),
			m_index: self.m_index.unwrap_or(SubBlockEntry::M_INDEX_INVALID),
			x: self.x,
			y: self.y,
			width: self.logical_width,
			height: self.logical_height,
			stored_width: self.physical_width,
			stored_height: self.physical_height,
			pixel_type_raw: self.pixel_type.to_raw(),
			compression_raw: self.compression_mode_raw,
			pyramid_type_byte: self.pyramid_type_byte,
			file_position,
		}
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.logical_width <= 0 || self.logical_height <= 0 {
			return Err(WriteError::InvalidArgument("logical size must be positive".into()).into());
		}
		if self.physical_width <= 0 || self.physical_height <= 0 {
			return Err(WriteError::InvalidArgument("physical size must be positive".into()).into());
		}
		if self.pixel_type == PixelType::Invalid {
			return Err(WriteError::InvalidArgument("pixel type must be valid".into()).into());
		}

		Ok(())
	}
}

/// Description of an attachment to add.
#[derive(Clone, Debug)]
pub struct AddAttachmentInfo {
	/// Content GUID.
	pub content_guid: Guid,
	/// Content file type (at most 8 ASCII characters).
	pub content_file_type: String,
	/// Name (at most 80 ASCII characters).
	pub name: String,
}

impl AddAttachmentInfo {
	pub(crate) fn to_entry(&self, file_position: u64) -> AttachmentEntry {
		let mut entry = AttachmentEntry::new(self.content_guid, &self.content_file_type, &self.name);
		entry.file_position = file_position;
		entry
	}
}

/// The XML metadata (and optional binary attachment) to write.
#[derive(Clone, Copy, Debug)]
pub struct WriteMetadataInfo<'a> {
	/// The UTF-8 XML document.
	pub xml: &'a [u8],
	/// Optional binary attachment.
	pub attachment: Option<&'a [u8]>,
}

/// Validate a coordinate against declared bounds.
///
/// Shared with the in-place engine, which performs the same checks.
pub(crate) fn check_coordinate_against_bounds(
	dim_bounds: Option<&DimBounds>,
	m_index_bounds: Option<(i32, i32)>,
	coordinate: &Coordinate,
	m_index: Option<i32>,
) -> Result<()> {
	if let Some(bounds) = dim_bounds {
		let mut declared_dimensions = 0usize;
		for (dimension, start, size) in bounds.iter() {
			let Some(position) = coordinate.position(dimension) else {
				return Err(WriteError::SubBlockCoordinateInsufficient.into());
			};
			if position < start || position >= start + size {
				return Err(WriteError::SubBlockCoordinateOutOfBounds.into());
			}

			declared_dimensions += 1;
		}

		if declared_dimensions != coordinate.len() {
			return Err(WriteError::AddCoordinateContainsUnexpectedDimension.into());
		}
	}

	if let Some((min, max)) = m_index_bounds {
		// a declared M bounds requires every sub-block to carry an M index
		let Some(m) = m_index else {
			return Err(WriteError::SubBlockCoordinateInsufficient.into());
		};
		if m < min || m > max {
			return Err(WriteError::SubBlockCoordinateOutOfBounds.into());
		}
	}

	Ok(())
}

#[derive(Clone, Copy, Debug)]
struct ReservedSlot {
	position: u64,
	allocated: u64,
}

/// A CZI document being written sequentially.
pub struct Writer<S> {
	stream: Option<S>,
	info: WriterInfo,
	header: FileHeaderSegmentData,
	next_segment_pos: u64,
	subblocks: WriterSubBlockDirectory,
	attachments: WriterAttachmentDirectory,
	reserved_metadata: Option<ReservedSlot>,
	reserved_subblock_directory: Option<ReservedSlot>,
	reserved_attachment_directory: Option<ReservedSlot>,
	metadata_segment: Option<SegmentWrite>,
}

impl<S: WriteStream> Writer<S> {
	/// Create a new document on `stream`: write a fresh file header and any
	/// requested reservation placeholders.
	#[instrument(level = "debug", skip(stream, info))]
	pub fn create(mut stream: S, info: WriterInfo) -> Result<Self> {
		let guid = info.file_guid.unwrap_or_else(Guid::generate);
		let header = FileHeaderSegmentData::new(guid, guid);
		write_file_header(&mut stream, &header)?;

		let mut writer = Self {
			stream: Some(stream),
			info,
			header,
			next_segment_pos: FIRST_SEGMENT_POS,
			subblocks: WriterSubBlockDirectory::new(),
			attachments: WriterAttachmentDirectory::new(),
			reserved_metadata: None,
			reserved_subblock_directory: None,
			reserved_attachment_directory: None,
			metadata_segment: None,
		};

		writer.reserved_metadata = writer.reserve(writer.info.reserved_metadata_size)?;
		writer.reserved_subblock_directory =
			writer.reserve(writer.info.reserved_subblock_directory_size)?;
		writer.reserved_attachment_directory =
			writer.reserve(writer.info.reserved_attachment_directory_size)?;

		Ok(writer)
	}

	fn reserve(&mut self, data_size: Option<u64>) -> Result<Option<ReservedSlot>> {
		let Some(data_size) = data_size else {
			return Ok(None);
		};
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write = write_reservation(stream, self.next_segment_pos, data_size)?;
		self.next_segment_pos = write.end();

		Ok(Some(ReservedSlot {
			position: write.position,
			allocated: write.allocated,
		}))
	}

	/// Append one sub-block.
	///
	/// The payloads are streamed in chunks; a source that ends before its
	/// declared size is zero-padded. A failed add leaves no trace in the
	/// directory.
	#[instrument(level = "debug", skip(self, info, payload))]
	pub fn sync_add_subblock(
		&mut self,
		info: &AddSubBlockInfo,
		payload: SubBlockPayload<'_>,
	) -> Result<()> {
		info.validate()?;
		check_coordinate_against_bounds(
			self.info.dim_bounds.as_ref(),
			self.info.m_index_bounds,
			&info.coordinate,
			info.m_index,
		)?;

		let entry = info.to_entry(self.next_segment_pos);
		if !self.info.allow_duplicate_subblocks && self.subblocks.contains_slot(&entry) {
			return Err(WriteError::AddCoordinateAlreadyExisting.into());
		}

		// write first, register after: a failed write must not leave a
		// directory entry behind
		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write = write_subblock_segment(stream, self.next_segment_pos, &entry, payload, None)?;
		self.next_segment_pos = write.end();
		self.subblocks.add_allowing_duplicates(entry);

		Ok(())
	}

	/// Append one attachment.
	#[instrument(level = "debug", skip(self, info, data))]
	pub fn sync_add_attachment(
		&mut self,
		info: &AddAttachmentInfo,
		data: Payload<'_>,
		data_size: u64,
	) -> Result<()> {
		let entry = info.to_entry(self.next_segment_pos);
		if self.attachments.contains_key(&entry) {
			return Err(WriteError::AddAttachmentAlreadyExisting.into());
		}

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write =
			write_attachment_segment(stream, self.next_segment_pos, &entry, data, data_size, None)?;
		self.next_segment_pos = write.end();
		self.attachments.try_add(entry);

		Ok(())
	}

	/// Write the metadata segment.
	///
	/// Reuses the reserved slot or a previously written segment when the new
	/// content fits; otherwise appends and marks the old segment deleted.
	#[instrument(level = "debug", skip(self, info))]
	pub fn sync_write_metadata(&mut self, info: &WriteMetadataInfo<'_>) -> Result<()> {
		let used = crate::constants::SIZE_METADATA_DATA
			+ info.xml.len() as u64
			+ info.attachment.map_or(0, |a| a.len() as u64);

		let existing = self.metadata_segment.map(|w| (w.position, w.allocated)).or(self
			.reserved_metadata
			.map(|r| (r.position, r.allocated)));

		let stream = self.stream.as_mut().ok_or(Error::NotOperational)?;
		let write = match existing {
			Some((position, allocated)) if allocated >= used => write_metadata_segment(
				stream,
				position,
				info.xml,
				info.attachment,
				Some(allocated),
			)?,
			_ => {
				let write = write_metadata_segment(
					stream,
					self.next_segment_pos,
					info.xml,
					info.attachment,
					None,
				)?;
				if let Some((position, _)) = existing {
					mark_segment_deleted(stream, position)?;
				}

				self.next_segment_pos = write.end();
				write
			}
		};

		self.metadata_segment = Some(write);
		self.header.metadata_position = write.position as i64;
		Ok(())
	}

	/// Current aggregate statistics over what has been added.
	pub fn statistics(&self) -> &crate::directory::SubBlockStatistics {
		self.subblocks.statistics()
	}

	/// Finalise the document: emit the directories and rewrite the header.
	///
	/// Consumes the writer and returns the stream.
	#[instrument(level = "debug", skip(self))]
	pub fn close(mut self) -> Result<S> {
		let mut stream = self.stream.take().ok_or(Error::NotOperational)?;

		// sub-block directory, even when empty
		let write = Self::write_into_slot_or_append(
			&mut stream,
			&mut self.next_segment_pos,
			self.reserved_subblock_directory,
			|stream, position, allocated| {
				write_subblock_directory_segment(stream, position, self.subblocks.iter(), allocated)
			},
		)?;
		self.header.subblock_directory_position = write.position as i64;

		// attachment directory, only when attachments exist
		if !self.attachments.is_empty() {
			let write = Self::write_into_slot_or_append(
				&mut stream,
				&mut self.next_segment_pos,
				self.reserved_attachment_directory,
				|stream, position, allocated| {
					write_attachment_directory_segment(
						stream,
						position,
						self.attachments.iter(),
						allocated,
					)
				},
			)?;
			self.header.attachment_directory_position = write.position as i64;
		}

		write_file_header(&mut stream, &self.header)?;
		debug!(
			subblocks = self.subblocks.len(),
			attachments = self.attachments.len(),
			"closed writer"
		);
		Ok(stream)
	}

	/// Write a directory segment into its reserved slot when it fits, else
	/// append at the end (and mark the reservation deleted).
	fn write_into_slot_or_append(
		stream: &mut S,
		next_segment_pos: &mut u64,
		slot: Option<ReservedSlot>,
		write: impl Fn(&mut S, u64, Option<u64>) -> Result<SegmentWrite>,
	) -> Result<SegmentWrite> {
		if let Some(slot) = slot {
			// the emitter refuses a pinned allocation that is too small
			// before touching the stream
			match write(stream, slot.position, Some(slot.allocated)) {
				Ok(segment) => return Ok(segment),
				Err(Error::InternalError(_)) => {}
				Err(other) => return Err(other),
			}
		}

		let segment = write(stream, *next_segment_pos, None)?;
		*next_segment_pos = segment.end();
		if let Some(slot) = slot {
			mark_segment_deleted(stream, slot.position)?;
		}

		Ok(segment)
	}
}

impl<S> std::fmt::Debug for Writer<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Writer")
			.field("next_segment_pos", &self.next_segment_pos)
			.field("subblocks", &self.subblocks.len())
			.field("attachments", &self.attachments.len())
			.finish()
	}
}
