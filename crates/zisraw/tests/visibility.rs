//! End-to-end visibility-optimisation scenarios: composing tiles must read
//! only the sub-blocks that can contribute pixels, and the optimisation must
//! never change the rendered output.

mod common;

use common::{build_test_czi, open_reader, test_plane, RecordingRepository, SubBlockPosition, XorShift};
use zisraw::accessor::{AccessorOptions, SingleChannelScalingTileAccessor, SingleChannelTileAccessor};
use zisraw::bitmap::RgbFloatColor;
use zisraw::codec::LibConfig;
use zisraw::geometry::IntRect;
use zisraw::pixel::PixelType;

fn options(with_optimization: bool, clear: bool) -> AccessorOptions<'static> {
	AccessorOptions {
		use_visibility_check_optimization: with_optimization,
		background_color: if clear {
			RgbFloatColor::black()
		} else {
			RgbFloatColor::none()
		},
		..Default::default()
	}
}

#[test]
fn three_overlapping_subblocks_only_the_covering_one_is_read() {
	// three 2x2 tiles at (0,0), (1,1), (2,2); the ROI (1,1,1,1) is fully
	// covered by M=1, and M=2 does not even intersect
	let bytes = build_test_czi(&[
		SubBlockPosition { rectangle: IntRect::new(0, 0, 2, 2), m_index: 0 },
		SubBlockPosition { rectangle: IntRect::new(1, 1, 2, 2), m_index: 1 },
		SubBlockPosition { rectangle: IntRect::new(2, 2, 2, 2), m_index: 2 },
	]);
	let reader = open_reader(bytes);
	let recording = RecordingRepository::new(&reader);
	let config = LibConfig::new();
	let accessor = SingleChannelTileAccessor::new(&recording, &config);

	let composite = accessor
		.get_with_pixel_type(
			PixelType::Gray8,
			&IntRect::new(1, 1, 1, 1),
			&test_plane(),
			&options(true, false),
		)
		.expect("compose");

	assert_eq!((composite.width(), composite.height()), (1, 1));
	assert_eq!(composite.pixel(0, 0), &[2]);

	let reads = recording.reads();
	assert!(!reads.contains(&0), "sub-block #0 is not expected to be read");
	assert!(!reads.contains(&2), "sub-block #2 is not expected to be read");
	assert_eq!(reads, vec![1]);
}

#[test]
fn three_coincident_subblocks_only_the_top_is_read() {
	let bytes = build_test_czi(&[
		SubBlockPosition { rectangle: IntRect::new(0, 0, 2, 2), m_index: 0 },
		SubBlockPosition { rectangle: IntRect::new(0, 0, 2, 2), m_index: 1 },
		SubBlockPosition { rectangle: IntRect::new(0, 0, 2, 2), m_index: 2 },
	]);
	let reader = open_reader(bytes);
	let recording = RecordingRepository::new(&reader);
	let config = LibConfig::new();
	let accessor = SingleChannelTileAccessor::new(&recording, &config);

	let composite = accessor
		.get_with_pixel_type(
			PixelType::Gray8,
			&IntRect::new(1, 1, 1, 1),
			&test_plane(),
			&options(true, false),
		)
		.expect("compose");

	assert_eq!(composite.pixel(0, 0), &[3]);
	assert_eq!(recording.reads(), vec![2]);
}

#[test]
fn random_tiles_render_identically_with_and_without_optimization() {
	let mut rng = XorShift(0x9e3779b97f4a7c15);
	const ROI: IntRect = IntRect::new(0, 0, 120, 120);

	for _ in 0..10 {
		let count = 1 + rng.next(100);
		let mut blocks: Vec<SubBlockPosition> = (0..count)
			.map(|m| SubBlockPosition {
				rectangle: IntRect::new(
					rng.next(100),
					rng.next(100),
					1 + rng.next(100),
					1 + rng.next(100),
				),
				m_index: m,
			})
			.collect();
		// shuffle the insertion order so storage order differs from M order
		for i in (1..blocks.len()).rev() {
			let j = rng.next(i as u32 + 1) as usize;
			blocks.swap(i, j);
		}

		let bytes = build_test_czi(&blocks);
		let reader = open_reader(bytes);
		let recording = RecordingRepository::new(&reader);
		let config = LibConfig::new();
		let accessor = SingleChannelTileAccessor::new(&recording, &config);

		let with_optimization = accessor
			.get_with_pixel_type(PixelType::Gray8, &ROI, &test_plane(), &options(true, true))
			.expect("compose with optimisation");
		let reads_with = recording.reads().len();

		recording.clear_reads();
		let without_optimization = accessor
			.get_with_pixel_type(PixelType::Gray8, &ROI, &test_plane(), &options(false, true))
			.expect("compose without optimisation");
		let reads_without = recording.reads().len();

		assert_eq!(
			with_optimization.data(),
			without_optimization.data(),
			"composites with and without the visibility optimisation differ"
		);
		assert!(
			reads_with <= reads_without,
			"optimisation read more sub-blocks ({reads_with}) than the plain path ({reads_without})"
		);
	}
}

#[test]
fn scaling_accessor_at_full_zoom_matches_tile_accessor() {
	let blocks = [
		SubBlockPosition { rectangle: IntRect::new(0, 0, 4, 4), m_index: 0 },
		SubBlockPosition { rectangle: IntRect::new(2, 2, 4, 4), m_index: 1 },
	];
	let bytes = build_test_czi(&blocks);
	let reader = open_reader(bytes);
	let config = LibConfig::new();

	let roi = IntRect::new(0, 0, 6, 6);
	let tiles = SingleChannelTileAccessor::new(&reader, &config)
		.get_with_pixel_type(PixelType::Gray8, &roi, &test_plane(), &options(false, true))
		.expect("tile composite");
	let scaled = SingleChannelScalingTileAccessor::new(&reader, &config)
		.get_with_pixel_type(PixelType::Gray8, &roi, &test_plane(), 1.0, &options(false, true))
		.expect("scaling composite");

	assert_eq!(tiles.data(), scaled.data());
}

#[test]
fn scaling_accessor_respects_visibility_upper_bound() {
	let blocks = [
		SubBlockPosition { rectangle: IntRect::new(0, 0, 3, 3), m_index: 0 },
		SubBlockPosition { rectangle: IntRect::new(0, 0, 3, 3), m_index: 1 },
	];
	let bytes = build_test_czi(&blocks);
	let reader = open_reader(bytes);
	let recording = RecordingRepository::new(&reader);
	let config = LibConfig::new();
	let accessor = SingleChannelScalingTileAccessor::new(&recording, &config);

	let roi = IntRect::new(0, 0, 3, 3);
	let composite = accessor
		.get_with_pixel_type(PixelType::Gray8, &roi, &test_plane(), 1.0, &options(true, true))
		.expect("compose");
	assert_eq!(composite.pixel(0, 0), &[2]);
	assert_eq!(recording.reads(), vec![1]);
}
