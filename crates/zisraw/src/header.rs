//! The file-header segment.
//!
//! Fixed 512 bytes of data after the segment header, always at offset 0. It
//! carries the format version, the two file GUIDs, and the positions of the
//! sub-block directory, the metadata segment, and the attachment directory
//! (0 meaning "not present").

use deku::prelude::*;
use tracing::{debug, instrument};

use crate::constants::{SIZE_FILE_HEADER_DATA, SIZE_SEGMENT_HEADER};
use crate::error::Error;
use crate::error::Result as CzResult;
use crate::guid::Guid;
use crate::segment::{SegmentHeader, SegmentId};
use crate::stream::{read_exact_at, write_all_at, ReadStream, WriteStream};

/// Format major version written by this crate.
pub const FILE_MAJOR_VERSION: i32 = 1;
/// Format minor version written by this crate.
pub const FILE_MINOR_VERSION: i32 = 0;

/// The 512-byte data part of the file-header segment.
#[derive(Clone, Debug, PartialEq, DekuRead, DekuWrite)]
pub struct FileHeaderSegmentData {
	/// Major format version, 1.
	#[deku(endian = "little")]
	pub major: i32,
	/// Minor format version, 0.
	#[deku(endian = "little")]
	pub minor: i32,
	/// Reserved.
	#[deku(endian = "little")]
	pub reserved1: i32,
	/// Reserved.
	#[deku(endian = "little")]
	pub reserved2: i32,
	/// GUID of the primary file of a multi-file set.
	pub primary_file_guid: Guid,
	/// GUID of this file; equals the primary GUID for a single file.
	pub file_guid: Guid,
	/// Part number within a multi-file set, 0 for a single file.
	#[deku(endian = "little")]
	pub file_part: i32,
	/// Absolute offset of the sub-block directory segment, 0 if absent.
	#[deku(endian = "little")]
	pub subblock_directory_position: i64,
	/// Absolute offset of the metadata segment, 0 if absent.
	#[deku(endian = "little")]
	pub metadata_position: i64,
	/// Non-zero while an update is in flight. Preserved, written as 0.
	#[deku(endian = "little")]
	pub update_pending: i32,
	/// Absolute offset of the attachment directory segment, 0 if absent.
	#[deku(endian = "little")]
	pub attachment_directory_position: i64,
	/// Padding to 512 bytes.
	#[deku(count = "432")]
	pub spare: Vec<u8>,
}

impl FileHeaderSegmentData {
	/// A fresh header with the given GUIDs and no directory positions.
	pub fn new(primary_file_guid: Guid, file_guid: Guid) -> Self {
		Self {
			major: FILE_MAJOR_VERSION,
			minor: FILE_MINOR_VERSION,
			reserved1: 0,
			reserved2: 0,
			primary_file_guid,
			file_guid,
			file_part: 0,
			subblock_directory_position: 0,
			metadata_position: 0,
			update_pending: 0,
			attachment_directory_position: 0,
			spare: vec![0; 432],
		}
	}

	/// Sub-block directory position, `None` if not present.
	pub fn subblock_directory(&self) -> Option<u64> {
		(self.subblock_directory_position > 0).then_some(self.subblock_directory_position as u64)
	}

	/// Metadata segment position, `None` if not present.
	pub fn metadata(&self) -> Option<u64> {
		(self.metadata_position > 0).then_some(self.metadata_position as u64)
	}

	/// Attachment directory position, `None` if not present.
	pub fn attachment_directory(&self) -> Option<u64> {
		(self.attachment_directory_position > 0).then_some(self.attachment_directory_position as u64)
	}
}

/// Parse the file header from the start of a stream.
#[instrument(level = "debug", skip(stream))]
pub fn read_file_header<S: ReadStream + ?Sized>(stream: &mut S) -> CzResult<FileHeaderSegmentData> {
	let mut buf = vec![0u8; (SIZE_SEGMENT_HEADER + SIZE_FILE_HEADER_DATA) as usize];
	read_exact_at(stream, 0, &mut buf)?;

	let header = SegmentHeader::parse(&buf[..SIZE_SEGMENT_HEADER as usize])?;
	if header.segment_id() != Some(SegmentId::FileHeader) {
		return Err(Error::CorruptedData("file does not start with a CZI file header".into()));
	}

	let (_, data) =
		FileHeaderSegmentData::from_bytes((&buf[SIZE_SEGMENT_HEADER as usize..], 0))
			.map_err(Error::from_deku)?;
	debug!(
		major = data.major,
		minor = data.minor,
		subblock_directory = data.subblock_directory_position,
		metadata = data.metadata_position,
		attachment_directory = data.attachment_directory_position,
		"read file header"
	);

	Ok(data)
}

/// Write the file-header segment at offset 0.
pub fn write_file_header<S: WriteStream + ?Sized>(
	stream: &mut S,
	data: &FileHeaderSegmentData,
) -> CzResult<()> {
	let header = SegmentHeader::new(
		SegmentId::FileHeader,
		SIZE_FILE_HEADER_DATA as i64,
		SIZE_FILE_HEADER_DATA as i64,
	);
	let mut bytes = header.to_bytes().map_err(Error::from_deku)?;
	bytes.extend(data.to_bytes().map_err(Error::from_deku)?);
	write_all_at(stream, 0, &bytes, "FileHeaderSegment")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stream::MemoryStream;

	#[test]
	fn file_header_roundtrip() {
		let mut data = FileHeaderSegmentData::new(Guid::generate(), Guid::generate());
		data.subblock_directory_position = 544;
		data.attachment_directory_position = 4096;

		let mut stream = MemoryStream::new();
		write_file_header(&mut stream, &data).expect("write");
		assert_eq!(stream.len() as u64, SIZE_SEGMENT_HEADER + SIZE_FILE_HEADER_DATA);

		let parsed = read_file_header(&mut stream).expect("read");
		assert_eq!(parsed, data);
		assert_eq!(parsed.subblock_directory(), Some(544));
		assert_eq!(parsed.metadata(), None);
		assert_eq!(parsed.attachment_directory(), Some(4096));
	}

	#[test]
	fn missing_header_is_corrupted_data() {
		let mut stream = MemoryStream::with_data(vec![0u8; 544]);
		assert!(matches!(
			read_file_header(&mut stream),
			Err(Error::CorruptedData(_))
		));
	}
}
