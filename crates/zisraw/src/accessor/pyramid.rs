//! The pyramid-layer tile accessor: compose the sub-blocks of one explicit
//! pyramid layer.
//!
//! The layer is chosen by the caller as a (minification factor, layer
//! number) pair; sub-blocks are classified by the geometric rule and only
//! those on the requested layer are painted. One destination pixel covers
//! `factor^layer` layer-0 pixels.

use tracing::{debug, instrument};

use crate::bitmap::Bitmap;
use crate::codec::LibConfig;
use crate::coordinate::Coordinate;
use crate::decode::SubBlockRepository;
use crate::directory::{classify_pyramid_layer, SubBlockEntry};
use crate::error::{Error, Result, WriteError};
use crate::geometry::IntRect;
use crate::pixel::PixelType;

use super::{
	check_plane_coordinates, coverage::check_for_visibility, get_subblock_bitmap,
	scene_filter_accepts, sort_by_m, try_get_pixel_type, AccessorOptions,
};

/// Which pyramid layer to compose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PyramidLayerInfo {
	/// Minification factor between adjacent layers, at least 2.
	pub minification_factor: u32,
	/// Layer number; 0 is native resolution.
	pub pyramid_layer_no: u8,
}

impl PyramidLayerInfo {
	/// Size of one pixel of this layer in layer-0 pixels.
	pub fn pixel_size_on_layer0(&self) -> Result<i64> {
		let mut size = 1i64;
		for _ in 0..self.pyramid_layer_no {
			size = size
				.checked_mul(i64::from(self.minification_factor))
				.ok_or(Error::Write(WriteError::InvalidArgument(
					"pyramid layer out of range".into(),
				)))?;
		}
		Ok(size)
	}
}

/// Composes the sub-blocks of one pyramid layer of one plane.
pub struct SingleChannelPyramidLayerTileAccessor<'r, R: SubBlockRepository + ?Sized> {
	repository: &'r R,
	config: &'r LibConfig,
}

impl<'r, R: SubBlockRepository + ?Sized> SingleChannelPyramidLayerTileAccessor<'r, R> {
	/// New accessor over a sub-block repository.
	pub fn new(repository: &'r R, config: &'r LibConfig) -> Self {
		Self { repository, config }
	}

	/// Compose a layer, probing the pixel type from the channel.
	pub fn get(
		&self,
		roi: &IntRect,
		plane: &Coordinate,
		layer: PyramidLayerInfo,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		let pixel_type = try_get_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, layer, options)
	}

	/// Compose a layer into a bitmap of the given pixel type.
	///
	/// `roi` is in layer-0 coordinates; the destination is sized
	/// `roi / factor^layer`.
	#[instrument(level = "debug", skip(self, plane, options))]
	pub fn get_with_pixel_type(
		&self,
		pixel_type: PixelType,
		roi: &IntRect,
		plane: &Coordinate,
		layer: PyramidLayerInfo,
		options: &AccessorOptions<'_>,
	) -> Result<Bitmap> {
		if layer.minification_factor < 2 {
			return Err(WriteError::InvalidArgument(
				"minification factor must be at least 2".into(),
			)
			.into());
		}

		check_plane_coordinates(&self.repository.statistics(), plane)?;

		let pixel_size = layer.pixel_size_on_layer0()?;
		let width = (i64::from(roi.w.max(0)) / pixel_size) as u32;
		let height = (i64::from(roi.h.max(0)) / pixel_size) as u32;
		let mut destination = Bitmap::new(pixel_type, width, height)?;
		destination.fill(&options.background_color);

		let mut selection: Vec<(usize, SubBlockEntry)> = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(roi), false, &mut |index, entry| {
				let classified = classify_pyramid_layer(
					entry.logical_rect(),
					entry.stored_size(),
					layer.minification_factor,
				);
				if classified == Some(layer.pyramid_layer_no)
					&& scene_filter_accepts(options.scene_filter, entry)
				{
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
		debug!(tiles = selection.len(), ?layer, "painting pyramid layer composite");

		for (index, entry) in &selection {
			let bitmap =
				get_subblock_bitmap(self.repository, self.config, options, *index, entry)?;
			let dst_x = (i64::from(entry.x - roi.x) / pixel_size) as i32;
			let dst_y = (i64::from(entry.y - roi.y) / pixel_size) as i32;
			destination.blit(&bitmap, dst_x, dst_y)?;
			if options.draw_tile_border {
				destination.draw_border(&IntRect::new(
					dst_x,
					dst_y,
					entry.stored_width,
					entry.stored_height,
				));
			}
		}

		Ok(destination)
	}
}
