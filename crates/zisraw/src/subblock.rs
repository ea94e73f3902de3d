//! Sub-block segments: parsing and the owned sub-block handle.
//!
//! A sub-block segment carries a 16-byte fixed part (payload sizes), a copy
//! of its directory entry, then the XML metadata, the pixel data, and the
//! sub-block attachment. The data part never starts its payloads before
//! offset 256, so small entries are padded.

use deku::DekuContainerRead;
use tracing::{debug, instrument};

use crate::bitmap::Bitmap;
use crate::codec::LibConfig;
use crate::constants::{
	SIZE_SEGMENT_HEADER, SIZE_SUBBLOCK_DATA_FIXED_PART, SIZE_SUBBLOCK_DATA_MINIMUM,
};
use crate::directory::entry::{DirectoryEntryDe, DirectoryEntryDv, ParseOptions, SubBlockEntry};
use crate::error::{Error, Result};
use crate::segment::{read_segment_header, SegmentId};
use crate::stream::{read_exact_at, ReadStream};

/// An owned sub-block: the embedded directory entry and the three payloads.
#[derive(Clone, Debug)]
pub struct SubBlock {
	/// The directory entry embedded in the segment.
	pub entry: SubBlockEntry,
	/// Sub-block XML metadata (may be empty).
	pub metadata: Vec<u8>,
	/// The (possibly compressed) pixel data.
	pub data: Vec<u8>,
	/// Sub-block attachment (may be empty).
	pub attachment: Vec<u8>,
}

impl SubBlock {
	/// Decode the pixel data into a bitmap of the stored size.
	pub fn create_bitmap(&self, config: &LibConfig) -> Result<Bitmap> {
		let stored = self.entry.stored_size();
		config.decode(
			self.entry.compression_raw,
			&self.data,
			self.entry.pixel_type(),
			stored.w,
			stored.h,
		)
	}
}

/// Offset of the payloads within the data part, given the entry's wire size.
fn content_offset(entry_wire_size: u64) -> u64 {
	SIZE_SUBBLOCK_DATA_MINIMUM.max(SIZE_SUBBLOCK_DATA_FIXED_PART + entry_wire_size)
}

/// Read the sub-block segment at `offset`.
///
/// When `directory_entry` is given and `strict` is set, the entry embedded
/// in the segment must agree with the directory's.
#[instrument(level = "debug", skip(stream, directory_entry))]
pub(crate) fn read_subblock_segment<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	directory_entry: Option<&SubBlockEntry>,
	strict: bool,
) -> Result<SubBlock> {
	let header = read_segment_header(stream, offset, SegmentId::SubBlock)?;
	if (header.used_size as u64) < SIZE_SUBBLOCK_DATA_MINIMUM {
		return Err(Error::CorruptedData("sub-block segment data below minimum size".into()));
	}

	let data_start = offset + SIZE_SEGMENT_HEADER;
	let mut head = vec![0u8; SIZE_SUBBLOCK_DATA_MINIMUM as usize];
	read_exact_at(stream, data_start, &mut head)?;

	let metadata_size = i32::from_le_bytes(
		head[0..4].try_into().map_err(|_| Error::InternalError("sub-block fixed part"))?,
	);
	let attachment_size = i32::from_le_bytes(
		head[4..8].try_into().map_err(|_| Error::InternalError("sub-block fixed part"))?,
	);
	let data_size = i64::from_le_bytes(
		head[8..16].try_into().map_err(|_| Error::InternalError("sub-block fixed part"))?,
	);
	if metadata_size < 0 || attachment_size < 0 || data_size < 0 {
		return Err(Error::CorruptedData("sub-block segment with negative payload size".into()));
	}

	let entry_bytes = &head[SIZE_SUBBLOCK_DATA_FIXED_PART as usize..];
	let schema = entry_bytes.get(..2).unwrap_or_default();
	let (entry, entry_wire_size) = if schema == b"DV" {
		// the DV entry may exceed the 256-byte minimum; in that case fetch
		// the tail before parsing
		let dimension_count = i32::from_le_bytes(
			entry_bytes[28..32]
				.try_into()
				.map_err(|_| Error::InternalError("sub-block DV header"))?,
		);
		if !(1..=crate::constants::MAX_DIMENSION_COUNT as i32).contains(&dimension_count) {
			return Err(Error::CorruptedData(
				"sub-block DV entry with out-of-range dimension count".into(),
			));
		}

		let wire_size = 32 + 20 * dimension_count as u64;
		let mut dv_bytes = entry_bytes.to_vec();
		if SIZE_SUBBLOCK_DATA_FIXED_PART + wire_size > SIZE_SUBBLOCK_DATA_MINIMUM {
			let extra = (SIZE_SUBBLOCK_DATA_FIXED_PART + wire_size - SIZE_SUBBLOCK_DATA_MINIMUM)
				as usize;
			let mut tail = vec![0u8; extra];
			read_exact_at(stream, data_start + SIZE_SUBBLOCK_DATA_MINIMUM, &mut tail)?;
			dv_bytes.extend(tail);
		}

		let (_, dv) = DirectoryEntryDv::from_bytes((&dv_bytes, 0)).map_err(Error::from_deku)?;
		(SubBlockEntry::from_dv(&dv, &ParseOptions::lax())?, wire_size)
	} else if schema == b"DE" {
		let (_, de) = DirectoryEntryDe::from_bytes((entry_bytes, 0)).map_err(Error::from_deku)?;
		(
			SubBlockEntry::from_de(&de),
			crate::constants::SIZE_DIRECTORY_ENTRY_DE,
		)
	} else {
		return Err(Error::CorruptedData("sub-block segment with unknown entry schema".into()));
	};

	if let Some(expected) = directory_entry {
		let agrees = entry.same_slot(expected)
			&& entry.logical_rect() == expected.logical_rect()
			&& entry.stored_size() == expected.stored_size()
			&& entry.pixel_type_raw == expected.pixel_type_raw
			&& entry.compression_raw == expected.compression_raw;
		if !agrees && strict {
			return Err(Error::CorruptedData(
				"sub-block segment disagrees with its directory entry".into(),
			));
		}
	}

	let payload_start = content_offset(entry_wire_size);
	let total = payload_start + metadata_size as u64 + data_size as u64 + attachment_size as u64;
	if total > header.used_size as u64 {
		return Err(Error::CorruptedData("sub-block payloads exceed the segment's used size".into()));
	}
	debug!(
		metadata_size,
		data_size,
		attachment_size,
		payload_start,
		"reading sub-block payloads"
	);

	let mut metadata = vec![0u8; metadata_size as usize];
	read_exact_at(stream, data_start + payload_start, &mut metadata)?;

	let mut data = vec![0u8; data_size as usize];
	read_exact_at(
		stream,
		data_start + payload_start + metadata_size as u64,
		&mut data,
	)?;

	let mut attachment = vec![0u8; attachment_size as usize];
	read_exact_at(
		stream,
		data_start + payload_start + metadata_size as u64 + data_size as u64,
		&mut attachment,
	)?;

	Ok(SubBlock {
		entry,
		metadata,
		data,
		attachment,
	})
}

/// The payload layout of a sub-block segment: where the payloads start and
/// how large the data part is in total.
pub(crate) fn subblock_data_layout(
	entry: &SubBlockEntry,
	metadata_size: u64,
	data_size: u64,
	attachment_size: u64,
) -> (u64, u64) {
	let payload_start = content_offset(entry.dv_wire_size());
	let used = payload_start + metadata_size + data_size + attachment_size;
	(payload_start, used)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn payloads_never_start_before_256() {
		assert_eq!(content_offset(92), 256);
		assert_eq!(content_offset(240), 256);
		assert_eq!(content_offset(241), 257);
		assert_eq!(content_offset(832), 848);
	}
}
