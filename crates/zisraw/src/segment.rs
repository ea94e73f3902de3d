//! The 32-byte segment header and the segment magics.
//!
//! Every segment starts with a 16-byte ASCII id (NUL-padded), the allocated
//! size, and the used size of the data part. `allocated_size ≥ used_size`,
//! and the allocated size is a multiple of 32 for everything a writer emits.

use deku::prelude::*;
use tracing::trace;

use crate::constants::SIZE_SEGMENT_HEADER;
use crate::error::Error;
use crate::error::Result as CzResult;
use crate::stream::{read_exact_at, ReadStream};

/// Magic id of the file-header segment.
pub const MAGIC_FILE_HEADER: [u8; 16] = magic(b"ZISRAWFILE");
/// Magic id of the sub-block directory segment.
pub const MAGIC_SUBBLOCK_DIRECTORY: [u8; 16] = magic(b"ZISRAWDIRECTORY");
/// Magic id of a sub-block segment.
pub const MAGIC_SUBBLOCK: [u8; 16] = magic(b"ZISRAWSUBBLOCK");
/// Magic id of the metadata segment.
pub const MAGIC_METADATA: [u8; 16] = magic(b"ZISRAWMETADATA");
/// Magic id of the attachment directory segment.
pub const MAGIC_ATTACHMENT_DIRECTORY: [u8; 16] = magic(b"ZISRAWATTDIR");
/// Magic id of an attachment segment.
pub const MAGIC_ATTACHMENT: [u8; 16] = magic(b"ZISRAWATTACH");
/// Magic id overwriting a soft-deleted segment.
pub const MAGIC_DELETED: [u8; 16] = magic(b"DELETED");

const fn magic(name: &[u8]) -> [u8; 16] {
	let mut id = [0u8; 16];
	let mut i = 0;
	while i < name.len() {
		id[i] = name[i];
		i += 1;
	}
	id
}

/// The kind of segment a header's id names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentId {
	/// `ZISRAWFILE`.
	FileHeader,
	/// `ZISRAWDIRECTORY`.
	SubBlockDirectory,
	/// `ZISRAWSUBBLOCK`.
	SubBlock,
	/// `ZISRAWMETADATA`.
	Metadata,
	/// `ZISRAWATTDIR`.
	AttachmentDirectory,
	/// `ZISRAWATTACH`.
	Attachment,
	/// `DELETED`.
	Deleted,
}

impl SegmentId {
	/// The 16-byte magic for this segment kind.
	pub const fn magic(self) -> [u8; 16] {
		match self {
			SegmentId::FileHeader => MAGIC_FILE_HEADER,
			SegmentId::SubBlockDirectory => MAGIC_SUBBLOCK_DIRECTORY,
			SegmentId::SubBlock => MAGIC_SUBBLOCK,
			SegmentId::Metadata => MAGIC_METADATA,
			SegmentId::AttachmentDirectory => MAGIC_ATTACHMENT_DIRECTORY,
			SegmentId::Attachment => MAGIC_ATTACHMENT,
			SegmentId::Deleted => MAGIC_DELETED,
		}
	}

	/// Classify a 16-byte id, `None` if it matches no known magic.
	pub fn classify(id: &[u8; 16]) -> Option<Self> {
		Some(match *id {
			MAGIC_FILE_HEADER => SegmentId::FileHeader,
			MAGIC_SUBBLOCK_DIRECTORY => SegmentId::SubBlockDirectory,
			MAGIC_SUBBLOCK => SegmentId::SubBlock,
			MAGIC_METADATA => SegmentId::Metadata,
			MAGIC_ATTACHMENT_DIRECTORY => SegmentId::AttachmentDirectory,
			MAGIC_ATTACHMENT => SegmentId::Attachment,
			MAGIC_DELETED => SegmentId::Deleted,
			_ => return None,
		})
	}

	/// Short human-readable name for diagnostics.
	pub const fn name(self) -> &'static str {
		match self {
			SegmentId::FileHeader => "file header",
			SegmentId::SubBlockDirectory => "sub-block directory",
			SegmentId::SubBlock => "sub-block",
			SegmentId::Metadata => "metadata",
			SegmentId::AttachmentDirectory => "attachment directory",
			SegmentId::Attachment => "attachment",
			SegmentId::Deleted => "deleted",
		}
	}
}

/// The fixed 32-byte header preceding every segment's data.
#[derive(Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SegmentHeader {
	/// 16-byte ASCII id, NUL-padded.
	pub id: [u8; 16],
	/// Bytes allocated for the data part (a multiple of 32 when written).
	pub allocated_size: i64,
	/// Bytes of the data part actually in use.
	pub used_size: i64,
}

impl SegmentHeader {
	/// New header for a segment kind with the given sizes.
	pub fn new(id: SegmentId, allocated_size: i64, used_size: i64) -> Self {
		Self {
			id: id.magic(),
			allocated_size,
			used_size,
		}
	}

	/// Classify the id, `None` for an unknown magic.
	pub fn segment_id(&self) -> Option<SegmentId> {
		SegmentId::classify(&self.id)
	}

	/// Parse a segment header from exactly 32 bytes.
	pub fn parse(bytes: &[u8]) -> CzResult<Self> {
		let (_, header) = Self::from_bytes((bytes, 0)).map_err(Error::from_deku)?;
		if header.allocated_size < 0 || header.used_size < 0 {
			return Err(Error::CorruptedData("segment header with negative size".into()));
		}
		if header.used_size > header.allocated_size {
			return Err(Error::CorruptedData(
				"segment header with used size exceeding allocated size".into(),
			));
		}

		Ok(header)
	}
}

/// Read the segment header at `offset` and classify its magic.
///
/// Fails with [`Error::CorruptedData`] if the magic is unknown.
#[cfg_attr(feature = "expose-internals", visibility::make(pub))]
pub(crate) fn read_segment_header_any<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
) -> CzResult<(SegmentId, SegmentHeader)> {
	let mut buf = [0u8; SIZE_SEGMENT_HEADER as usize];
	read_exact_at(stream, offset, &mut buf)?;
	let header = SegmentHeader::parse(&buf)?;
	let Some(id) = header.segment_id() else {
		return Err(Error::CorruptedData(
			format!("unknown segment magic at offset {offset}").into(),
		));
	};
	trace!(%offset, id = id.name(), allocated = %header.allocated_size, used = %header.used_size, "read segment header");

	Ok((id, header))
}

/// Read the segment header at `offset`, requiring a specific magic.
///
/// A known-but-different magic is [`Error::IllegalData`]; an unknown magic is
/// [`Error::CorruptedData`].
#[cfg_attr(feature = "expose-internals", visibility::make(pub))]
pub(crate) fn read_segment_header<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	expected: SegmentId,
) -> CzResult<SegmentHeader> {
	let (id, header) = read_segment_header_any(stream, offset)?;
	if id != expected {
		return Err(Error::IllegalData {
			offset,
			message: format!("expected {} segment, found {}", expected.name(), id.name()).into(),
		});
	}

	Ok(header)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stream::MemoryStream;
	use deku::DekuContainerWrite;

	#[test]
	fn magics_are_nul_padded_ascii() {
		assert_eq!(&MAGIC_FILE_HEADER[..10], b"ZISRAWFILE");
		assert_eq!(&MAGIC_FILE_HEADER[10..], &[0u8; 6]);
		assert_eq!(&MAGIC_DELETED[..7], b"DELETED");
	}

	#[test]
	fn header_roundtrip() {
		let header = SegmentHeader::new(SegmentId::SubBlock, 96, 77);
		let bytes = header.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), 32);
		assert_eq!(SegmentHeader::parse(&bytes).expect("parse"), header);
	}

	#[test]
	fn used_size_must_not_exceed_allocated() {
		let header = SegmentHeader {
			id: MAGIC_SUBBLOCK,
			allocated_size: 32,
			used_size: 33,
		};
		let bytes = header.to_bytes().expect("serialise");
		assert!(SegmentHeader::parse(&bytes).is_err());
	}

	#[test]
	fn wrong_magic_for_call_site_is_illegal_data() {
		let header = SegmentHeader::new(SegmentId::Metadata, 32, 32);
		let mut stream = MemoryStream::with_data(header.to_bytes().expect("serialise"));
		let err = read_segment_header(&mut stream, 0, SegmentId::SubBlock).expect_err("magic");
		assert!(matches!(err, Error::IllegalData { .. }));
	}
}
