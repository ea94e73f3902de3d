//! Shared fixtures: build small in-memory CZI documents and observe which
//! sub-blocks an accessor actually reads.
#![allow(dead_code)]

use std::cell::RefCell;

use zisraw::coordinate::{Coordinate, DimBounds, Dimension};
use zisraw::decode::{Reader, ReaderOptions, SubBlockRepository};
use zisraw::directory::{PyramidStatistics, SubBlockEntry, SubBlockStatistics};
use zisraw::encode::{AddSubBlockInfo, SubBlockPayload, Writer, WriterInfo};
use zisraw::error::Result;
use zisraw::geometry::IntRect;
use zisraw::guid::Guid;
use zisraw::pixel::PixelType;
use zisraw::stream::MemoryStream;
use zisraw::subblock::SubBlock;

/// Position and M index of one sub-block of a test document.
#[derive(Clone, Copy, Debug)]
pub struct SubBlockPosition {
	pub rectangle: IntRect,
	pub m_index: i32,
}

/// The plane coordinate every test sub-block lives on.
pub fn test_plane() -> Coordinate {
	[(Dimension::C, 0), (Dimension::T, 0)].into_iter().collect()
}

/// Description of a Gray8 layer-0 sub-block for [`add_gray8_subblock`].
pub fn gray8_info(rect: IntRect, m_index: i32) -> AddSubBlockInfo {
	AddSubBlockInfo {
		coordinate: test_plane(),
		m_index: Some(m_index),
		x: rect.x,
		y: rect.y,
		logical_width: rect.w,
		logical_height: rect.h,
		physical_width: rect.w,
		physical_height: rect.h,
		pixel_type: PixelType::Gray8,
		compression_mode_raw: 0,
		pyramid_type_byte: 0,
	}
}

/// Build a document with one Gray8 sub-block per entry; the n-th sub-block's
/// pixels all hold the value `n + 1`.
pub fn build_test_czi(subblocks: &[SubBlockPosition]) -> Vec<u8> {
	let info = WriterInfo {
		file_guid: Some(Guid::NIL),
		dim_bounds: Some(
			[(Dimension::T, 0, 1), (Dimension::C, 0, 1)]
				.into_iter()
				.collect::<DimBounds>(),
		),
		m_index_bounds: Some((0, subblocks.len() as i32 - 1)),
		..Default::default()
	};
	let mut writer = Writer::create(MemoryStream::new(), info).expect("create writer");

	for (count, block) in subblocks.iter().enumerate() {
		let size = (block.rectangle.w * block.rectangle.h) as usize;
		let pixels = vec![(count + 1) as u8; size];
		writer
			.sync_add_subblock(
				&gray8_info(block.rectangle, block.m_index),
				SubBlockPayload::from_slices(&pixels, None, None),
			)
			.expect("add sub-block");
	}

	writer
		.sync_write_metadata(&zisraw::encode::WriteMetadataInfo {
			xml: b"<ImageDocument><Metadata/></ImageDocument>",
			attachment: None,
		})
		.expect("write metadata");

	writer.close().expect("close writer").into_data()
}

/// Open a reader over document bytes.
pub fn open_reader(bytes: Vec<u8>) -> Reader<MemoryStream> {
	Reader::open(MemoryStream::with_data(bytes), &ReaderOptions::lax()).expect("open reader")
}

/// A repository shim that records which sub-blocks were read from the stream.
pub struct RecordingRepository<'r, R: SubBlockRepository> {
	inner: &'r R,
	reads: RefCell<Vec<usize>>,
}

impl<'r, R: SubBlockRepository> RecordingRepository<'r, R> {
	pub fn new(inner: &'r R) -> Self {
		Self {
			inner,
			reads: RefCell::new(Vec::new()),
		}
	}

	/// Indices of the sub-blocks read so far, in read order.
	pub fn reads(&self) -> Vec<usize> {
		self.reads.borrow().clone()
	}

	pub fn clear_reads(&self) {
		self.reads.borrow_mut().clear();
	}
}

impl<R: SubBlockRepository> SubBlockRepository for RecordingRepository<'_, R> {
	fn enumerate_subblocks(&self, func: &mut dyn FnMut(usize, &SubBlockEntry) -> bool) {
		self.inner.enumerate_subblocks(func);
	}

	fn try_get_subblock_info(&self, index: usize) -> Option<SubBlockEntry> {
		self.inner.try_get_subblock_info(index)
	}

	fn read_subblock(&self, index: usize) -> Result<SubBlock> {
		self.reads.borrow_mut().push(index);
		self.inner.read_subblock(index)
	}

	fn statistics(&self) -> SubBlockStatistics {
		self.inner.statistics()
	}

	fn pyramid_statistics(&self) -> PyramidStatistics {
		self.inner.pyramid_statistics()
	}
}

/// A deterministic xorshift generator for the stress tests.
pub struct XorShift(pub u64);

impl XorShift {
	pub fn next(&mut self, bound: u32) -> i32 {
		self.0 ^= self.0 << 13;
		self.0 ^= self.0 >> 7;
		self.0 ^= self.0 << 17;
		(self.0 % u64::from(bound)) as i32
	}
}
