//! The single-channel tile accessor: compose layer-0 sub-blocks at native
//! resolution.

use tracing::{debug, instrument};

use crate::bitmap::Bitmap;
use crate::codec::LibConfig;
use crate::coordinate::Coordinate;
use crate::decode::SubBlockRepository;
use crate::directory::SubBlockEntry;
use crate::error::Result;
use crate::geometry::IntRect;
use crate::pixel::PixelType;

use super::{
	check_plane_coordinates, coverage::check_for_visibility, get_subblock_bitmap,
	scene_filter_accepts, sort_by_m, try_get_pixel_type, AccessorOptions,
};

/// Composes layer-0 sub-blocks of one plane into a bitmap at native
/// resolution.
pub struct SingleChannelTileAccessor<'r, R: SubBlockRepository + ?Sized> {
	repository: &'r R,
	config: &'r LibConfig,
}

impl<'r, R: SubBlockRepository + ?Sized> SingleChannelTileAccessor<'r, R> {
	/// New accessor over a sub-block repository.
	pub fn new(repository: &'r R, config: &'r LibConfig) -> Self {
		Self { repository, config }
	}

	/// Compose the ROI of a plane, probing the pixel type from the channel.
	pub fn get(
		&self,
		roi: &IntRect,
		plane: &Coordinate,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		let pixel_type = try_get_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, options)
	}

	/// Compose the ROI of a plane into a bitmap of the given pixel type.
	#[instrument(level = "debug", skip(self, plane, options))]
	pub fn get_with_pixel_type(
		&self,
		pixel_type: PixelType,
		roi: &IntRect,
		plane: &Coordinate,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		check_plane_coordinates(&self.repository.statistics(), plane)?;

		let mut destination = Bitmap::new(pixel_type, roi.w.max(0) as u32, roi.h.max(0) as u32)?;
		destination.fill(&options.background_color);

		let mut selection: Vec<(usize, SubBlockEntry)> = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(roi), true, &mut |index, entry| {
				if scene_filter_accepts(options.scene_filter, entry) {
					selection.push((index, entry.clone()));
				}
				true
			});

		if options.sort_by_m {
			sort_by_m(&mut selection);
		}

		if options.use_visibility_check_optimization {
			let rects: Vec<IntRect> =
				selection.iter().map(|(_, entry)| entry.logical_rect()).collect();
			let visible = check_for_visibility(roi, &rects);
			selection = visible.into_iter().map(|i| selection[i].clone()).collect();
		}
		debug!(tiles = selection.len(), "painting tile composite");

		for (index, entry) in &selection {
			let bitmap =
				get_subblock_bitmap(self.repository, self.config, options, *index, entry)?;
			destination.blit(&bitmap, entry.x - roi.x, entry.y - roi.y)?;
			if options.draw_tile_border {
				destination.draw_border(&IntRect::new(
					entry.x - roi.x,
					entry.y - roi.y,
					entry.width,
					entry.height,
				));
			}
		}

		Ok(destination)
	}
}
