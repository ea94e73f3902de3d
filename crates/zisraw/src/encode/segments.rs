//! Low-level segment emitters shared by the writer and the in-place engine.
//!
//! Every emitter writes one complete segment (header, data, zero padding up
//! to the allocation) at an explicit position and reports what it wrote. A
//! caller may pin the allocated size to reuse an existing segment's space;
//! otherwise the allocation is the used size aligned to 32 bytes.

use deku::DekuContainerWrite;
use tracing::{debug, instrument};

use crate::attachment::{attachment_directory_data_bytes, AttachmentEntry};
use crate::constants::{
	align_segment_size, SIZE_ATTACHMENT_DATA, SIZE_SEGMENT_HEADER, SIZE_SEGMENT_ID,
	SIZE_SUBBLOCK_DATA_FIXED_PART,
};
use crate::directory::{subblock_directory_data_bytes, SubBlockEntry};
use crate::error::{Error, Result, WriteError};
use crate::metadata::metadata_data_bytes;
use crate::segment::{SegmentHeader, SegmentId, MAGIC_DELETED};
use crate::stream::{write_all_at, write_zeroes_at, WriteStream};
use crate::subblock::subblock_data_layout;

/// A payload fed to the writer chunk by chunk.
///
/// The emitter calls [`PayloadSource::next_chunk`] until it returns `None`
/// or the declared size is reached; a source that ends early is zero-padded,
/// one that delivers too much fails the write.
pub trait PayloadSource {
	/// The next chunk of bytes, `None` when the source is exhausted.
	fn next_chunk(&mut self) -> Option<&[u8]>;
}

impl PayloadSource for &[u8] {
	fn next_chunk(&mut self) -> Option<&[u8]> {
		if self.is_empty() {
			None
		} else {
			Some(std::mem::take(self))
		}
	}
}

/// One payload of a sub-block or attachment segment.
pub enum Payload<'a> {
	/// No payload.
	Empty,
	/// The whole payload as one slice.
	Bytes(&'a [u8]),
	/// A chunked source.
	Source(&'a mut dyn PayloadSource),
}

impl<'a> From<&'a [u8]> for Payload<'a> {
	fn from(bytes: &'a [u8]) -> Self {
		Payload::Bytes(bytes)
	}
}

/// Where and how large a segment ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentWrite {
	/// Absolute offset of the segment header.
	pub position: u64,
	/// Allocated size of the data part.
	pub allocated: u64,
	/// Used size of the data part.
	pub used: u64,
}

impl SegmentWrite {
	/// Offset of the first byte after the segment.
	pub fn end(&self) -> u64 {
		self.position + SIZE_SEGMENT_HEADER + self.allocated
	}
}

fn resolve_allocation(used: u64, specified_allocated: Option<u64>) -> Result<u64> {
	let minimum = align_segment_size(used);
	match specified_allocated {
		None => Ok(minimum),
		Some(allocated) if allocated >= used => Ok(allocated),
		Some(_) => Err(Error::InternalError("specified segment allocation below used size")),
	}
}

/// Write a payload at `offset`, zero-padding up to `declared` bytes.
fn write_payload<S: WriteStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	payload: Payload<'_>,
	declared: u64,
	what: &'static str,
) -> Result<()> {
	let mut written = 0u64;
	match payload {
		Payload::Empty => {}
		Payload::Bytes(bytes) => {
			if bytes.len() as u64 > declared {
				return Err(WriteError::GetDataCallError(
					format!("{what}: payload larger than its declared size").into(),
				)
				.into());
			}

			write_all_at(stream, offset, bytes, what)?;
			written = bytes.len() as u64;
		}
		Payload::Source(source) => {
			while let Some(chunk) = source.next_chunk() {
				if written + chunk.len() as u64 > declared {
					return Err(WriteError::GetDataCallError(
						format!("{what}: payload source delivered more than the declared size")
							.into(),
					)
					.into());
				}

				write_all_at(stream, offset + written, chunk, what)?;
				written += chunk.len() as u64;
			}
		}
	}

	if written < declared {
		write_zeroes_at(stream, offset + written, declared - written, what)?;
	}

	Ok(())
}

fn write_segment_header<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	id: SegmentId,
	allocated: u64,
	used: u64,
	what: &'static str,
) -> Result<()> {
	let header = SegmentHeader::new(id, allocated as i64, used as i64);
	let bytes = header.to_bytes().map_err(Error::from_deku)?;
	write_all_at(stream, position, &bytes, what)
}

/// Overwrite the magic of the segment at `position` with `DELETED`.
pub(crate) fn mark_segment_deleted<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
) -> Result<()> {
	debug!(%position, "marking segment deleted");
	write_all_at(stream, position, &MAGIC_DELETED[..SIZE_SEGMENT_ID], "DeleteSegment")
}

/// Write a placeholder segment (magic `DELETED`) reserving `data_size` bytes.
pub(crate) fn write_reservation<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	data_size: u64,
) -> Result<SegmentWrite> {
	let allocated = align_segment_size(data_size);
	write_segment_header(stream, position, SegmentId::Deleted, allocated, 0, "Reservation")?;
	write_zeroes_at(stream, position + SIZE_SEGMENT_HEADER, allocated, "Reservation")?;

	Ok(SegmentWrite {
		position,
		allocated,
		used: 0,
	})
}

/// The three payloads of a sub-block segment with their declared sizes.
pub struct SubBlockPayload<'a> {
	/// The (possibly compressed) pixel data.
	pub data: Payload<'a>,
	/// Declared size of the pixel data.
	pub data_size: u64,
	/// Sub-block XML metadata.
	pub metadata: Payload<'a>,
	/// Declared size of the metadata.
	pub metadata_size: u32,
	/// Sub-block attachment.
	pub attachment: Payload<'a>,
	/// Declared size of the attachment.
	pub attachment_size: u32,
}

impl<'a> SubBlockPayload<'a> {
	/// Payloads from plain slices; sizes are taken from the slices.
	pub fn from_slices(
		data: &'a [u8],
		metadata: Option<&'a [u8]>,
		attachment: Option<&'a [u8]>,
	) -> Self {
		Self {
			data: Payload::Bytes(data),
			data_size: data.len() as u64,
			metadata: metadata.map_or(Payload::Empty, Payload::Bytes),
			metadata_size: metadata.map_or(0, |m| m.len() as u32),
			attachment: attachment.map_or(Payload::Empty, Payload::Bytes),
			attachment_size: attachment.map_or(0, |a| a.len() as u32),
		}
	}

	/// The used size of the data part this payload produces for `entry`.
	pub fn used_size(&self, entry: &SubBlockEntry) -> u64 {
		subblock_data_layout(
			entry,
			u64::from(self.metadata_size),
			self.data_size,
			u64::from(self.attachment_size),
		)
		.1
	}
}

/// Write a complete sub-block segment at `position`.
///
/// `entry.file_position` must already equal `position`; the entry is
/// embedded in the segment verbatim.
#[instrument(level = "debug", skip(stream, entry, payload))]
pub(crate) fn write_subblock_segment<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	entry: &SubBlockEntry,
	payload: SubBlockPayload<'_>,
	specified_allocated: Option<u64>,
) -> Result<SegmentWrite> {
	let (payload_start, used) = subblock_data_layout(
		entry,
		u64::from(payload.metadata_size),
		payload.data_size,
		u64::from(payload.attachment_size),
	);
	let allocated = resolve_allocation(used, specified_allocated)?;

	// header, fixed part, embedded entry, padding up to the payload offset
	let mut head = SegmentHeader::new(SegmentId::SubBlock, allocated as i64, used as i64)
		.to_bytes()
		.map_err(Error::from_deku)?;
	head.extend((payload.metadata_size as i32).to_le_bytes());
	head.extend((payload.attachment_size as i32).to_le_bytes());
	head.extend((payload.data_size as i64).to_le_bytes());
	head.extend(entry.to_dv().to_bytes().map_err(Error::from_deku)?);
	debug_assert_eq!(
		head.len() as u64,
		SIZE_SEGMENT_HEADER + SIZE_SUBBLOCK_DATA_FIXED_PART + entry.dv_wire_size()
	);
	head.resize((SIZE_SEGMENT_HEADER + payload_start) as usize, 0);
	write_all_at(stream, position, &head, "SubBlockSegment")?;

	let data_start = position + SIZE_SEGMENT_HEADER;
	let mut at = data_start + payload_start;
	write_payload(
		stream,
		at,
		payload.metadata,
		u64::from(payload.metadata_size),
		"SubBlock-Metadata",
	)?;
	at += u64::from(payload.metadata_size);
	write_payload(stream, at, payload.data, payload.data_size, "SubBlock-Data")?;
	at += payload.data_size;
	write_payload(
		stream,
		at,
		payload.attachment,
		u64::from(payload.attachment_size),
		"SubBlock-Attachment",
	)?;
	at += u64::from(payload.attachment_size);

	if allocated > used {
		write_zeroes_at(stream, data_start + used, allocated - used, "AligningWithZeroes")?;
	}
	debug_assert_eq!(at, data_start + used);

	Ok(SegmentWrite {
		position,
		allocated,
		used,
	})
}

/// Write a complete attachment segment at `position`.
#[instrument(level = "debug", skip(stream, entry, data))]
pub(crate) fn write_attachment_segment<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	entry: &AttachmentEntry,
	data: Payload<'_>,
	data_size: u64,
	specified_allocated: Option<u64>,
) -> Result<SegmentWrite> {
	let used = SIZE_ATTACHMENT_DATA + data_size;
	let allocated = resolve_allocation(used, specified_allocated)?;

	let mut head = SegmentHeader::new(SegmentId::Attachment, allocated as i64, used as i64)
		.to_bytes()
		.map_err(Error::from_deku)?;
	head.extend((data_size as i64).to_le_bytes());
	head.extend([0u8; 8]); // spare
	head.extend(entry.to_a1().to_bytes().map_err(Error::from_deku)?);
	head.resize((SIZE_SEGMENT_HEADER + SIZE_ATTACHMENT_DATA) as usize, 0);
	write_all_at(stream, position, &head, "AttachmentSegment")?;

	let data_start = position + SIZE_SEGMENT_HEADER;
	write_payload(
		stream,
		data_start + SIZE_ATTACHMENT_DATA,
		data,
		data_size,
		"Attachment-Data",
	)?;

	if allocated > used {
		write_zeroes_at(stream, data_start + used, allocated - used, "AligningWithZeroes")?;
	}

	Ok(SegmentWrite {
		position,
		allocated,
		used,
	})
}

/// Write a complete metadata segment at `position`.
#[instrument(level = "debug", skip(stream, xml, attachment))]
pub(crate) fn write_metadata_segment<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	xml: &[u8],
	attachment: Option<&[u8]>,
	specified_allocated: Option<u64>,
) -> Result<SegmentWrite> {
	let data = metadata_data_bytes(xml, attachment)?;
	write_plain_segment(stream, position, SegmentId::Metadata, &data, specified_allocated, "MetadataSegment")
}

/// Write a complete sub-block directory segment at `position`.
#[instrument(level = "debug", skip(stream, entries))]
pub(crate) fn write_subblock_directory_segment<'a, S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	entries: impl ExactSizeIterator<Item = &'a SubBlockEntry>,
	specified_allocated: Option<u64>,
) -> Result<SegmentWrite> {
	let data = subblock_directory_data_bytes(entries)?;
	write_plain_segment(
		stream,
		position,
		SegmentId::SubBlockDirectory,
		&data,
		specified_allocated,
		"SubBlockDirectorySegment",
	)
}

/// Write a complete attachment directory segment at `position`.
#[instrument(level = "debug", skip(stream, entries))]
pub(crate) fn write_attachment_directory_segment<'a, S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	entries: impl ExactSizeIterator<Item = &'a AttachmentEntry>,
	specified_allocated: Option<u64>,
) -> Result<SegmentWrite> {
	let data = attachment_directory_data_bytes(entries)?;
	write_plain_segment(
		stream,
		position,
		SegmentId::AttachmentDirectory,
		&data,
		specified_allocated,
		"AttachmentDirectorySegment",
	)
}

fn write_plain_segment<S: WriteStream + ?Sized>(
	stream: &mut S,
	position: u64,
	id: SegmentId,
	data: &[u8],
	specified_allocated: Option<u64>,
	what: &'static str,
) -> Result<SegmentWrite> {
	let used = data.len() as u64;
	let allocated = resolve_allocation(used, specified_allocated)?;

	write_segment_header(stream, position, id, allocated, used, what)?;
	write_all_at(stream, position + SIZE_SEGMENT_HEADER, data, what)?;
	if allocated > used {
		write_zeroes_at(
			stream,
			position + SIZE_SEGMENT_HEADER + used,
			allocated - used,
			"AligningWithZeroes",
		)?;
	}

	Ok(SegmentWrite {
		position,
		allocated,
		used,
	})
}
