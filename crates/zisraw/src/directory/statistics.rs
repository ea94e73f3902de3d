//! Sub-block statistics and pyramid classification.
//!
//! Statistics are accumulated entry-by-entry as a directory is built and
//! consolidated (pyramid histogram sorted) before being surfaced.

use std::collections::BTreeMap;

use crate::coordinate::{DimBounds, Dimension};
use crate::directory::entry::SubBlockEntry;
use crate::geometry::{IntRect, IntSize};

/// Total and layer-0 bounding boxes of a set of sub-blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBoxes {
	/// Union of all logical rectangles.
	pub bounding_box: IntRect,
	/// Union of the logical rectangles of layer-0 sub-blocks only.
	pub bounding_box_layer0: IntRect,
}

/// Aggregate information about all sub-blocks in a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubBlockStatistics {
	/// Number of sub-blocks.
	pub subblock_count: u64,
	/// Smallest valid M index, `None` if no entry has one.
	pub min_m_index: Option<i32>,
	/// Largest valid M index.
	pub max_m_index: Option<i32>,
	/// Union of all logical rectangles.
	pub bounding_box: IntRect,
	/// Union of the logical rectangles of layer-0 sub-blocks.
	pub bounding_box_layer0: IntRect,
	/// Interval per dimension across all entries.
	pub dim_bounds: DimBounds,
	/// Bounding boxes per scene, keyed by the S position.
	pub scene_bounding_boxes: BTreeMap<i32, BoundingBoxes>,
}

impl SubBlockStatistics {
	fn update(&mut self, entry: &SubBlockEntry) {
		self.subblock_count += 1;

		let rect = entry.logical_rect();
		self.bounding_box = self.bounding_box.union(&rect);
		if entry.is_stored_size_equal_logical_size() {
			self.bounding_box_layer0 = self.bounding_box_layer0.union(&rect);
		}

		if let Some(m) = entry.m_index() {
			self.min_m_index = Some(self.min_m_index.map_or(m, |v| v.min(m)));
			self.max_m_index = Some(self.max_m_index.map_or(m, |v| v.max(m)));
		}

		for (dimension, position) in entry.coordinate.iter() {
			self.dim_bounds.widen(dimension, position);
		}

		if let Some(scene) = entry.coordinate.position(Dimension::S) {
			let boxes = self.scene_bounding_boxes.entry(scene).or_default();
			boxes.bounding_box = boxes.bounding_box.union(&rect);
			if entry.is_stored_size_equal_logical_size() {
				boxes.bounding_box_layer0 = boxes.bounding_box_layer0.union(&rect);
			}
		}
	}
}

/// Classification of one sub-block within a pyramid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PyramidLayerInfo {
	/// Minification factor between adjacent layers; 0 on layer 0.
	pub minification_factor: u8,
	/// Layer number; 0 is the bottom (stored == logical).
	pub pyramid_layer_no: u8,
}

impl PyramidLayerInfo {
	/// Marker for sub-blocks whose shrink ratio fits no integer pyramid.
	pub const NOT_REPRESENTABLE: Self = Self {
		minification_factor: 0xff,
		pyramid_layer_no: 0xff,
	};

	/// Whether this is the bottom layer.
	pub fn is_layer0(&self) -> bool {
		self.minification_factor == 0 && self.pyramid_layer_no == 0
	}

	/// Whether the sub-block could not be placed on a pyramid layer.
	pub fn is_not_representable(&self) -> bool {
		*self == Self::NOT_REPRESENTABLE
	}
}

/// Histogram bucket: one pyramid layer and the number of sub-blocks on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PyramidLayerStatistics {
	/// The layer.
	pub layer_info: PyramidLayerInfo,
	/// Number of sub-blocks on this layer.
	pub count: u64,
}

/// Per-scene pyramid layer histograms.
///
/// The key is the S position; `None` collects sub-blocks without an S
/// coordinate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PyramidStatistics {
	/// Histogram per scene, sorted by layer after consolidation.
	pub scene_pyramid_statistics: BTreeMap<Option<i32>, Vec<PyramidLayerStatistics>>,
}

/// Compute the pyramid layer of a sub-block for a given minification factor.
///
/// Layer 0 means stored equals logical. Otherwise the shrink ratio
/// `max(w/sw, h/sh)` is rounded to the nearest integer; the result is the
/// smallest `k` with `factor^k ≥ ratio`, accepted only if `factor^k` equals
/// the rounded ratio exactly. A pure function of its inputs.
pub fn classify_pyramid_layer(
	logical: IntRect,
	stored: IntSize,
	minification_factor: u32,
) -> Option<u8> {
	if minification_factor < 2 || !logical.is_valid() {
		return None;
	}
	if logical.w == stored.w as i32 && logical.h == stored.h as i32 {
		return Some(0);
	}
	if stored.w == 0 || stored.h == 0 {
		return None;
	}

	let ratio_w = f64::from(logical.w) / f64::from(stored.w);
	let ratio_h = f64::from(logical.h) / f64::from(stored.h);
	let rounded = ratio_w.max(ratio_h).round() as i64;
	if rounded < 1 {
		return None;
	}

	let factor = i64::from(minification_factor);
	let mut power = 1i64;
	let mut layer = 0u8;
	while power < rounded {
		power = power.checked_mul(factor)?;
		layer = layer.checked_add(1)?;
	}

	(power == rounded).then_some(layer)
}

/// Classify an entry trying the usual minification factors (2, then 3).
pub fn try_determine_pyramid_layer_info(entry: &SubBlockEntry) -> PyramidLayerInfo {
	if entry.is_stored_size_equal_logical_size() {
		return PyramidLayerInfo::default();
	}

	for factor in [2u32, 3] {
		if let Some(layer) = classify_pyramid_layer(entry.logical_rect(), entry.stored_size(), factor)
		{
			return PyramidLayerInfo {
				minification_factor: factor as u8,
				pyramid_layer_no: layer,
			};
		}
	}

	PyramidLayerInfo::NOT_REPRESENTABLE
}

/// Incrementally maintained statistics over a sub-block directory.
#[derive(Clone, Debug, Default)]
pub struct StatisticsUpdater {
	statistics: SubBlockStatistics,
	pyramid: PyramidStatistics,
	consolidated: bool,
}

impl StatisticsUpdater {
	/// Fresh, empty statistics.
	pub fn new() -> Self {
		Self::default()
	}

	/// Fold one entry into the statistics.
	pub fn update(&mut self, entry: &SubBlockEntry) {
		self.statistics.update(entry);

		let layer_info = try_determine_pyramid_layer_info(entry);
		let scene = entry.coordinate.position(Dimension::S);
		let histogram = self
			.pyramid
			.scene_pyramid_statistics
			.entry(scene)
			.or_default();
		match histogram.iter_mut().find(|s| s.layer_info == layer_info) {
			Some(bucket) => bucket.count += 1,
			None => histogram.push(PyramidLayerStatistics {
				layer_info,
				count: 1,
			}),
		}
		self.consolidated = false;
	}

	/// Sort the pyramid histograms by layer (unrepresentable buckets last).
	pub fn consolidate(&mut self) {
		if self.consolidated {
			return;
		}

		for histogram in self.pyramid.scene_pyramid_statistics.values_mut() {
			histogram.sort_by_key(|s| {
				(
					s.layer_info.is_not_representable(),
					s.layer_info.pyramid_layer_no,
					s.layer_info.minification_factor,
				)
			});
		}
		self.consolidated = true;
	}

	/// The aggregate statistics.
	pub fn statistics(&self) -> &SubBlockStatistics {
		&self.statistics
	}

	/// The consolidated pyramid statistics.
	///
	/// Call [`StatisticsUpdater::consolidate`] first; histograms are
	/// otherwise in insertion order.
	pub fn pyramid_statistics(&self) -> &PyramidStatistics {
		&self.pyramid
	}

	/// Drop everything and start over.
	pub fn clear(&mut self) {
		*self = Self::default();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinate::Coordinate;
	use crate::pixel::PixelType;

	fn entry(x: i32, y: i32, w: i32, h: i32, sw: i32, sh: i32, m: i32, scene: Option<i32>) -> SubBlockEntry {
		let mut coordinate = Coordinate::new();
		coordinate.set(Dimension::C, 0);
		if let Some(s) = scene {
			coordinate.set(Dimension::S, s);
		}
		SubBlockEntry {
			coordinate,
			m_index: m,
			x,
			y,
			width: w,
			height: h,
			stored_width: sw,
			stored_height: sh,
			pixel_type_raw: PixelType::Gray8.to_raw(),
			compression_raw: 0,
			pyramid_type_byte: 0,
			file_position: 0,
		}
	}

	#[test]
	fn bounding_boxes_are_unions() {
		let mut updater = StatisticsUpdater::new();
		updater.update(&entry(0, 0, 2, 2, 2, 2, 0, None));
		updater.update(&entry(3, 3, 2, 2, 2, 2, 1, None));
		updater.update(&entry(0, 0, 8, 8, 4, 4, 2, None)); // pyramid

		let s = updater.statistics();
		assert_eq!(s.subblock_count, 3);
		assert_eq!(s.bounding_box, IntRect::new(0, 0, 8, 8));
		assert_eq!(s.bounding_box_layer0, IntRect::new(0, 0, 5, 5));
		assert_eq!(s.min_m_index, Some(0));
		assert_eq!(s.max_m_index, Some(2));
		assert_eq!(s.dim_bounds.interval(Dimension::C), Some((0, 1)));
	}

	#[test]
	fn scene_boxes_are_tracked_separately() {
		let mut updater = StatisticsUpdater::new();
		updater.update(&entry(0, 0, 2, 2, 2, 2, 0, Some(0)));
		updater.update(&entry(10, 10, 2, 2, 2, 2, 1, Some(1)));

		let s = updater.statistics();
		assert_eq!(s.scene_bounding_boxes.len(), 2);
		assert_eq!(
			s.scene_bounding_boxes[&1].bounding_box,
			IntRect::new(10, 10, 2, 2)
		);
	}

	#[test]
	fn classification_is_a_pure_function_of_the_ratio() {
		let layer0 = classify_pyramid_layer(IntRect::new(0, 0, 512, 512), IntSize::new(512, 512), 2);
		assert_eq!(layer0, Some(0));

		let layer1 = classify_pyramid_layer(IntRect::new(0, 0, 512, 512), IntSize::new(256, 256), 2);
		assert_eq!(layer1, Some(1));

		let layer3 = classify_pyramid_layer(IntRect::new(0, 0, 4096, 4096), IntSize::new(512, 512), 2);
		assert_eq!(layer3, Some(3));

		// ratio 3 is not a power of two, but is a power of three
		let odd = IntRect::new(0, 0, 768, 768);
		assert_eq!(classify_pyramid_layer(odd, IntSize::new(256, 256), 2), None);
		assert_eq!(classify_pyramid_layer(odd, IntSize::new(256, 256), 3), Some(1));

		// ratio 5 fits neither factor
		let entry5 = entry(0, 0, 500, 500, 100, 100, 0, None);
		assert!(try_determine_pyramid_layer_info(&entry5).is_not_representable());
	}

	#[test]
	fn pyramid_histogram_counts_per_scene_and_layer() {
		let mut updater = StatisticsUpdater::new();
		updater.update(&entry(0, 0, 2, 2, 2, 2, 0, Some(0)));
		updater.update(&entry(2, 0, 2, 2, 2, 2, 1, Some(0)));
		updater.update(&entry(0, 0, 4, 4, 2, 2, 2, Some(0)));
		updater.consolidate();

		let pyramid = updater.pyramid_statistics();
		let histogram = &pyramid.scene_pyramid_statistics[&Some(0)];
		assert_eq!(histogram.len(), 2);
		assert!(histogram[0].layer_info.is_layer0());
		assert_eq!(histogram[0].count, 2);
		assert_eq!(histogram[1].layer_info.pyramid_layer_no, 1);
		assert_eq!(histogram[1].count, 1);
	}
}
