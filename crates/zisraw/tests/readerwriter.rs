//! In-place editing: replace/remove/add against an existing document.

mod common;

use common::{build_test_czi, gray8_info, open_reader, SubBlockPosition};
use zisraw::decode::SubBlockRepository;
use zisraw::encode::{AddAttachmentInfo, Payload, SubBlockPayload, WriteMetadataInfo};
use zisraw::error::{Error, ReaderWriteError, WriteError};
use zisraw::geometry::IntRect;
use zisraw::guid::Guid;
use zisraw::rw::{ReaderWriter, ReaderWriterOptions};
use zisraw::stream::MemoryStream;

fn two_block_czi() -> Vec<u8> {
	build_test_czi(&[
		SubBlockPosition { rectangle: IntRect::new(0, 0, 4, 4), m_index: 0 },
		SubBlockPosition { rectangle: IntRect::new(4, 0, 4, 4), m_index: 1 },
	])
}

fn open_rw(bytes: Vec<u8>) -> ReaderWriter<MemoryStream> {
	ReaderWriter::open(MemoryStream::with_data(bytes), &ReaderWriterOptions::default())
		.expect("open reader-writer")
}

#[test]
fn close_without_mutation_leaves_the_file_byte_identical() {
	let bytes = two_block_czi();
	let rw = open_rw(bytes.clone());
	let after = rw.close().expect("close").into_data();
	assert_eq!(after, bytes);
}

#[test]
fn replace_with_same_size_stays_in_place() {
	let bytes = two_block_czi();
	let original_len = bytes.len();
	let mut rw = open_rw(bytes);

	let before = rw.get_subblock_info(0).expect("entry");
	let new_pixels = vec![0xEEu8; 16];
	rw.replace_subblock(
		0,
		&gray8_info(IntRect::new(0, 0, 4, 4), 0),
		SubBlockPayload::from_slices(&new_pixels, None, None),
	)
	.expect("replace");

	let after = rw.get_subblock_info(0).expect("entry");
	assert_eq!(after.file_position, before.file_position, "same-size replace must not move");

	let out = rw.close().expect("close").into_data();
	assert_eq!(out.len(), original_len, "in-place replace must not grow the file");

	let reader = open_reader(out);
	assert_eq!(reader.read_subblock(0).expect("read").data, new_pixels);
	assert_eq!(reader.read_subblock(1).expect("read").data, vec![2u8; 16]);
}

#[test]
fn replace_with_larger_content_appends_and_marks_deleted() {
	let bytes = two_block_czi();
	let original_len = bytes.len();
	let mut rw = open_rw(bytes);

	let before = rw.get_subblock_info(0).expect("entry");
	// 32x32 no longer fits the old 4x4 allocation
	let new_pixels = vec![0x55u8; 32 * 32];
	rw.replace_subblock(
		0,
		&gray8_info(IntRect::new(0, 0, 32, 32), 0),
		SubBlockPayload::from_slices(&new_pixels, None, None),
	)
	.expect("replace");

	let after = rw.get_subblock_info(0).expect("entry");
	assert_ne!(after.file_position, before.file_position, "grown sub-block must move");

	let out = rw.close().expect("close").into_data();
	assert!(out.len() > original_len);

	// the old segment's magic was overwritten with DELETED
	let old = before.file_position as usize;
	assert_eq!(&out[old..old + 7], b"DELETED");

	let reader = open_reader(out);
	assert_eq!(reader.subblock_count(), 2);
	let replaced = reader.read_subblock(0).expect("read");
	assert_eq!(replaced.entry.logical_rect(), IntRect::new(0, 0, 32, 32));
	assert_eq!(replaced.data, new_pixels);
}

#[test]
fn remove_subblock_marks_deleted_and_shrinks_the_directory() {
	let bytes = two_block_czi();
	let mut rw = open_rw(bytes);

	let removed = rw.get_subblock_info(0).expect("entry");
	rw.remove_subblock(0).expect("remove");
	assert!(matches!(
		rw.remove_subblock(0),
		Err(Error::ReaderWrite(ReaderWriteError::InvalidSubBlkId(_)))
	));

	let out = rw.close().expect("close").into_data();
	let pos = removed.file_position as usize;
	assert_eq!(&out[pos..pos + 7], b"DELETED");

	let reader = open_reader(out);
	assert_eq!(reader.subblock_count(), 1);
	assert_eq!(
		reader.try_get_subblock_info(0).expect("entry").m_index(),
		Some(1)
	);
}

#[test]
fn add_subblock_and_attachment_to_an_existing_document() {
	let bytes = two_block_czi();
	let mut rw = open_rw(bytes);

	let key = rw
		.add_subblock(
			&gray8_info(IntRect::new(0, 4, 4, 4), 2),
			SubBlockPayload::from_slices(&[0x11; 16], None, None),
		)
		.expect("add sub-block");
	assert!(rw.get_subblock_info(key).is_some());

	// duplicate slot is refused
	assert!(matches!(
		rw.add_subblock(
			&gray8_info(IntRect::new(9, 9, 4, 4), 2),
			SubBlockPayload::from_slices(&[0; 16], None, None),
		),
		Err(Error::ReaderWrite(ReaderWriteError::AddCoordinateAlreadyExisting))
	));

	rw.add_attachment(
		&AddAttachmentInfo {
			content_guid: Guid::generate(),
			content_file_type: "JPG".into(),
			name: "Preview".into(),
		},
		Payload::Bytes(&[5, 6, 7]),
		3,
	)
	.expect("add attachment");

	let out = rw.close().expect("close").into_data();
	let reader = open_reader(out);
	assert_eq!(reader.subblock_count(), 3);
	assert_eq!(reader.attachment_count(), 1);
	assert_eq!(reader.read_attachment(0).expect("read").data, vec![5, 6, 7]);
}

#[test]
fn add_subblock_validates_its_arguments() {
	let bytes = two_block_czi();
	let mut rw = open_rw(bytes);

	let mut degenerate = gray8_info(IntRect::new(0, 4, 4, 4), 2);
	degenerate.logical_width = 0;
	assert!(matches!(
		rw.add_subblock(&degenerate, SubBlockPayload::from_slices(&[], None, None)),
		Err(Error::Write(WriteError::InvalidArgument(_)))
	));

	let mut invalid_pixels = gray8_info(IntRect::new(0, 4, 4, 4), 2);
	invalid_pixels.pixel_type = zisraw::pixel::PixelType::Invalid;
	assert!(matches!(
		rw.add_subblock(&invalid_pixels, SubBlockPayload::from_slices(&[0; 16], None, None)),
		Err(Error::Write(WriteError::InvalidArgument(_)))
	));

	// a failed add leaves the directory untouched
	let out = rw.close().expect("close").into_data();
	assert_eq!(open_reader(out).subblock_count(), 2);
}

#[test]
fn metadata_replace_or_append() {
	let bytes = two_block_czi();
	let mut rw = open_rw(bytes);

	// shorter XML fits the existing segment in place
	let old_position = rw.file_header().metadata().expect("metadata present");
	rw.write_metadata(&WriteMetadataInfo {
		xml: b"<ImageDocument/>",
		attachment: None,
	})
	.expect("write metadata");
	assert_eq!(rw.file_header().metadata(), Some(old_position));

	// a much larger document moves to the end, the old one is deleted
	let large = vec![b'x'; 4096];
	rw.write_metadata(&WriteMetadataInfo {
		xml: &large,
		attachment: None,
	})
	.expect("write metadata");
	let new_position = rw.file_header().metadata().expect("metadata present");
	assert_ne!(new_position, old_position);

	let out = rw.close().expect("close").into_data();
	assert_eq!(&out[old_position as usize..old_position as usize + 7], b"DELETED");

	let reader = open_reader(out);
	assert_eq!(reader.read_metadata().expect("read").xml, large);
}

#[test]
fn fresh_stream_initialises_a_new_document() {
	let mut rw = ReaderWriter::open(MemoryStream::new(), &ReaderWriterOptions::default())
		.expect("open fresh");
	rw.add_subblock(
		&gray8_info(IntRect::new(0, 0, 2, 2), 0),
		SubBlockPayload::from_slices(&[1, 2, 3, 4], None, None),
	)
	.expect("add");

	let out = rw.close().expect("close").into_data();
	let reader = open_reader(out);
	assert_eq!(reader.subblock_count(), 1);
	assert_eq!(reader.read_subblock(0).expect("read").data, vec![1, 2, 3, 4]);
}

#[test]
fn force_new_file_guid_rewrites_the_header() {
	let bytes = two_block_czi();
	let rw = ReaderWriter::open(
		MemoryStream::with_data(bytes.clone()),
		&ReaderWriterOptions {
			force_new_file_guid: true,
			..Default::default()
		},
	)
	.expect("open");
	let new_guid = rw.file_header().file_guid;
	assert!(!new_guid.is_nil());

	let out = rw.close().expect("close").into_data();
	assert_ne!(out, bytes);

	let reader = open_reader(out);
	assert_eq!(reader.file_header().file_guid, new_guid);
	assert_eq!(reader.subblock_count(), 2);
}
