//! The scaling tile accessor: compose a plane at an arbitrary zoom.
//!
//! Per scene, the pyramid layer whose own zoom is closest from above to the
//! requested zoom is selected, and its tiles are nearest-neighbour resampled
//! onto the destination. Scenes are handled independently because each may
//! have its own pyramid.

use std::collections::BTreeSet;

use tracing::{debug, instrument, trace};

use crate::bitmap::Bitmap;
use crate::codec::LibConfig;
use crate::coordinate::{Coordinate, Dimension};
use crate::decode::SubBlockRepository;
use crate::directory::SubBlockEntry;
use crate::error::{Result, WriteError};
use crate::geometry::{IntRect, IntSize};
use crate::pixel::PixelType;

use super::{
	check_plane_coordinates, coverage::check_for_visibility, get_subblock_bitmap,
	scene_filter_accepts, sort_by_m, try_get_pixel_type, AccessorOptions,
};

/// Zoom of a sub-block: stored extent over logical extent, taken from the
/// larger stored axis.
fn calc_zoom(logical: &IntRect, stored: &IntSize) -> f32 {
	if stored.w > stored.h {
		stored.w as f32 / logical.w as f32
	} else {
		stored.h as f32 / logical.h as f32
	}
}

/// Tiles on the selected layer have zooms within this factor of each other;
/// the next coarser or finer layer is at least 2x away.
const SAME_LAYER_ZOOM_SPREAD: f32 = 1.9;

/// The destination size for a ROI and zoom.
pub fn calc_size(roi: &IntRect, zoom: f32) -> IntSize {
	IntSize::new(
		(f64::from(roi.w.max(0)) * f64::from(zoom)).round() as u32,
		(f64::from(roi.h.max(0)) * f64::from(zoom)).round() as u32,
	)
}

/// Composes one plane at an arbitrary zoom in `(0, 1]`.
pub struct SingleChannelScalingTileAccessor<'r, R: SubBlockRepository + ?Sized> {
	repository: &'r R,
	config: &'r LibConfig,
}

impl<'r, R: SubBlockRepository + ?Sized> SingleChannelScalingTileAccessor<'r, R> {
	/// New accessor over a sub-block repository.
	pub fn new(repository: &'r R, config: &'r LibConfig) -> Self {
		Self { repository, config }
	}

	/// Compose the ROI at `zoom`, probing the pixel type from the channel.
	pub fn get(
		&self,
		roi: &IntRect,
		plane: &Coordinate,
		zoom: f32,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		let pixel_type = try_get_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, zoom, options)
	}

	/// Compose the ROI at `zoom` into a bitmap of the given pixel type.
	#[instrument(level = "debug", skip(self, plane, options))]
	pub fn get_with_pixel_type(
		&self,
		pixel_type: PixelType,
		roi: &IntRect,
		plane: &Coordinate,
		zoom: f32,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		if !(zoom > 0.0 && zoom <= 1.0) {
			return Err(WriteError::InvalidArgument("zoom must be in (0, 1]".into()).into());
		}

		let statistics = self.repository.statistics();
		check_plane_coordinates(&statistics, plane)?;

		let size = calc_size(roi, zoom);
		let mut destination = Bitmap::new(pixel_type, size.w, size.h)?;
		destination.fill(&options.background_color);

		// each scene selects its own pyramid layer
		let scenes = self.determine_involved_scenes(roi, options.scene_filter, &statistics);
		match scenes {
			None => {
				self.paint_scene(&mut destination, roi, plane, zoom, None, options)?;
			}
			Some(scenes) => {
				for scene in scenes {
					self.paint_scene(&mut destination, roi, plane, zoom, Some(scene), options)?;
				}
			}
		}

		Ok(destination)
	}

	/// Scenes whose bounding box intersects the ROI, or `None` when the
	/// document has no scenes.
	fn determine_involved_scenes(
		&self,
		roi: &IntRect,
		filter: Option<&BTreeSet<i32>>,
		statistics: &crate::directory::SubBlockStatistics,
	) -> Option<Vec<i32>> {
		if statistics.scene_bounding_boxes.is_empty() {
			return None;
		}

		Some(
			statistics
				.scene_bounding_boxes
				.iter()
				.filter(|(scene, boxes)| {
					boxes.bounding_box.intersects(roi)
						&& filter.map_or(true, |f| f.contains(scene))
				})
				.map(|(scene, _)| *scene)
				.collect(),
		)
	}

	fn paint_scene(
		&self,
		destination: &mut Bitmap,
		roi: &IntRect,
		plane: &Coordinate,
		zoom: f32,
		scene: Option<i32>,
		options: &AccessorOptions<'_>,
	) -> Result<()> {
		// all plane-matching sub-blocks of this scene intersecting the ROI,
		// every pyramid layer included
		let mut candidates: Vec<(usize, SubBlockEntry)> = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(roi), false, &mut |index, entry| {
				let in_scene = match scene {
					None => true,
					Some(scene) => entry.coordinate.position(Dimension::S) == Some(scene),
				};
				if in_scene && scene_filter_accepts(options.scene_filter, entry) {
					candidates.push((index, entry.clone()));
				}
				true
			});
		if candidates.is_empty() {
			return Ok(());
		}

		// ascending zoom; the first layer at or above the requested zoom is
		// the best from below, everything coarser is discarded
		candidates.sort_by(|(_, a), (_, b)| {
			calc_zoom(&a.logical_rect(), &a.stored_size())
				.total_cmp(&calc_zoom(&b.logical_rect(), &b.stored_size()))
		});
		let first = candidates
			.iter()
			.position(|(_, entry)| calc_zoom(&entry.logical_rect(), &entry.stored_size()) >= zoom)
			.unwrap_or(candidates.len() - 1);
		let layer_zoom = calc_zoom(
			&candidates[first].1.logical_rect(),
			&candidates[first].1.stored_size(),
		);
		let mut selection: Vec<(usize, SubBlockEntry)> = candidates
			.into_iter()
			.skip(first)
			.filter(|(_, entry)| {
				calc_zoom(&entry.logical_rect(), &entry.stored_size())
					<= layer_zoom * SAME_LAYER_ZOOM_SPREAD
			})
			.collect();
		trace!(?scene, layer_zoom, tiles = selection.len(), "selected pyramid layer");

		if options.sort_by_m {
			sort_by_m(&mut selection);
		}

		if options.use_visibility_check_optimization {
			let rects: Vec<IntRect> =
				selection.iter().map(|(_, entry)| entry.logical_rect()).collect();
			let visible = check_for_visibility(roi, &rects);
			selection = visible.into_iter().map(|i| selection[i].clone()).collect();
		}
		debug!(?scene, tiles = selection.len(), "painting scaled composite");

		for (index, entry) in &selection {
			self.scale_blit(destination, roi, zoom, *index, entry, options)?;
		}

		Ok(())
	}

	fn scale_blit(
		&self,
		destination: &mut Bitmap,
		roi: &IntRect,
		zoom: f32,
		index: usize,
		entry: &SubBlockEntry,
		options: &AccessorOptions<'_>,
	) -> Result<()> {
		let intersection = entry.logical_rect().intersect(roi);
		if !intersection.is_valid() {
			return Ok(());
		}

		let bitmap = get_subblock_bitmap(self.repository, self.config, options, index, entry)?;
		let stored = entry.stored_size();

		// the part of the stored bitmap corresponding to the intersection
		let sx_scale = f64::from(stored.w) / f64::from(entry.width);
		let sy_scale = f64::from(stored.h) / f64::from(entry.height);
		let src_roi = (
			f64::from(intersection.x - entry.x) * sx_scale,
			f64::from(intersection.y - entry.y) * sy_scale,
			f64::from(intersection.w) * sx_scale,
			f64::from(intersection.h) * sy_scale,
		);
		let dst_roi = (
			f64::from(intersection.x - roi.x) * f64::from(zoom),
			f64::from(intersection.y - roi.y) * f64::from(zoom),
			f64::from(intersection.w) * f64::from(zoom),
			f64::from(intersection.h) * f64::from(zoom),
		);

		destination.nearest_neighbor_blit(&bitmap, src_roi, dst_roi)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zoom_uses_the_larger_stored_axis() {
		let logical = IntRect::new(0, 0, 100, 200);
		assert_eq!(calc_zoom(&logical, &IntSize::new(50, 100)), 0.5);
		assert_eq!(calc_zoom(&logical, &IntSize::new(25, 100)), 0.5);
	}

	#[test]
	fn calc_size_rounds() {
		let roi = IntRect::new(0, 0, 3, 3);
		assert_eq!(calc_size(&roi, 0.5), IntSize::new(2, 2));
		assert_eq!(calc_size(&roi, 1.0), IntSize::new(3, 3));
	}
}
