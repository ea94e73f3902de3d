//! The metadata segment: UTF-8 XML plus an optional binary attachment.
//!
//! The structure of the XML is not interpreted here; callers get the raw
//! document and hand it to whatever XML tooling they use.

use deku::prelude::*;
use tracing::{debug, instrument};

use crate::constants::{SIZE_METADATA_DATA, SIZE_SEGMENT_HEADER};
use crate::error::Error;
use crate::error::Result as CzResult;
use crate::segment::{read_segment_header, SegmentId};
use crate::stream::{read_exact_at, ReadStream};

/// The fixed part of the metadata segment's data.
#[derive(Clone, Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct MetadataSegmentData {
	/// Size of the XML part in bytes.
	pub xml_size: i32,
	/// Size of the binary attachment in bytes, 0 if none.
	pub attachment_size: i32,
	/// Padding to 256 bytes.
	#[deku(count = "248")]
	pub spare: Vec<u8>,
}

/// A parsed metadata segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataSegment {
	/// The UTF-8 XML document.
	pub xml: Vec<u8>,
	/// The optional binary attachment.
	pub attachment: Option<Vec<u8>>,
}

impl MetadataSegment {
	/// The XML as a string, if valid UTF-8.
	pub fn xml_str(&self) -> CzResult<&str> {
		std::str::from_utf8(&self.xml)
			.map_err(|_| Error::CorruptedData("metadata XML is not valid UTF-8".into()))
	}
}

/// Read the metadata segment at `offset`.
#[instrument(level = "debug", skip(stream))]
pub(crate) fn read_metadata_segment<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
) -> CzResult<MetadataSegment> {
	read_segment_header(stream, offset, SegmentId::Metadata)?;

	let mut fixed = vec![0u8; SIZE_METADATA_DATA as usize];
	read_exact_at(stream, offset + SIZE_SEGMENT_HEADER, &mut fixed)?;
	let (_, data) = MetadataSegmentData::from_bytes((&fixed, 0)).map_err(Error::from_deku)?;
	if data.xml_size < 0 || data.attachment_size < 0 {
		return Err(Error::CorruptedData("metadata segment with negative part size".into()));
	}
	debug!(xml_size = data.xml_size, attachment_size = data.attachment_size, "read metadata segment");

	let mut xml = vec![0u8; data.xml_size as usize];
	read_exact_at(stream, offset + SIZE_SEGMENT_HEADER + SIZE_METADATA_DATA, &mut xml)?;

	let attachment = if data.attachment_size > 0 {
		let mut attachment = vec![0u8; data.attachment_size as usize];
		read_exact_at(
			stream,
			offset + SIZE_SEGMENT_HEADER + SIZE_METADATA_DATA + data.xml_size as u64,
			&mut attachment,
		)?;
		Some(attachment)
	} else {
		None
	};

	Ok(MetadataSegment { xml, attachment })
}

/// Serialise the data part of a metadata segment.
pub(crate) fn metadata_data_bytes(xml: &[u8], attachment: Option<&[u8]>) -> CzResult<Vec<u8>> {
	let fixed = MetadataSegmentData {
		xml_size: xml.len() as i32,
		attachment_size: attachment.map_or(0, |a| a.len() as i32),
		spare: vec![0; 248],
	};

	let mut data = fixed.to_bytes().map_err(Error::from_deku)?;
	data.extend_from_slice(xml);
	if let Some(attachment) = attachment {
		data.extend_from_slice(attachment);
	}

	Ok(data)
}
