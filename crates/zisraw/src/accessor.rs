//! Tile-composition accessors: compose sub-blocks into a single bitmap.
//!
//! Three accessors share one options set and one selection machinery: the
//! layer-0 tile accessor, the explicit pyramid-layer accessor, and the
//! arbitrary-zoom scaling accessor. All paint with the painter's algorithm,
//! ordered by M index, and can prune sub-blocks that are provably overdrawn
//! (the visibility optimisation).

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::bitmap::{Bitmap, RgbFloatColor};
use crate::cache::SubBlockCache;
use crate::codec::LibConfig;
use crate::coordinate::{Coordinate, Dimension};
use crate::decode::SubBlockRepository;
use crate::directory::{SubBlockEntry, SubBlockStatistics};
use crate::error::{Error, PlaneCoordinateError, Result};
use crate::pixel::{CompressionMode, PixelType};

pub mod coverage;
pub mod pyramid;
pub mod scaling;
pub mod tile;

pub use coverage::RectangleCoverageCalculator;
pub use pyramid::SingleChannelPyramidLayerTileAccessor;
pub use scaling::{calc_size, SingleChannelScalingTileAccessor};
pub use tile::SingleChannelTileAccessor;

/// Options shared by all tile-composition accessors.
pub struct AccessorOptions<'a> {
	/// Fill the destination with this colour before painting; the default
	/// (NaN channels) leaves it untouched.
	pub background_color: RgbFloatColor,
	/// Stable-sort the selected sub-blocks by M ascending; invalid M sorts
	/// first. Default true.
	pub sort_by_m: bool,
	/// Draw a 1-pixel black border around each painted tile.
	pub draw_tile_border: bool,
	/// Skip reads of sub-blocks fully overdrawn by later tiles.
	pub use_visibility_check_optimization: bool,
	/// Restrict painting to these scenes (S values).
	pub scene_filter: Option<&'a BTreeSet<i32>>,
	/// Fetch decoded bitmaps through this cache.
	pub cache: Option<&'a SubBlockCache>,
	/// Only cache sub-blocks whose data is compressed.
	pub only_use_cache_for_compressed_data: bool,
}

impl Default for AccessorOptions<'_> {
	fn default() -> Self {
		Self {
			background_color: RgbFloatColor::none(),
			sort_by_m: true,
			draw_tile_border: false,
			use_visibility_check_optimization: false,
			scene_filter: None,
			cache: None,
			only_use_cache_for_compressed_data: false,
		}
	}
}

/// Validate a plane coordinate against the document's dimension bounds.
///
/// S must not appear; every bounded dimension must be given unless its size
/// is 1; given positions must lie within their interval; dimensions outside
/// the bounds must not be given.
pub(crate) fn check_plane_coordinates(
	statistics: &SubBlockStatistics,
	plane: &Coordinate,
) -> Result<()> {
	if plane.is_valid(Dimension::S) {
		return Err(PlaneCoordinateError::InvalidDimension(Dimension::S).into());
	}

	for dimension in Dimension::ALL {
		if dimension == Dimension::S {
			continue;
		}

		match statistics.dim_bounds.interval(dimension) {
			Some((start, size)) => match plane.position(dimension) {
				None => {
					if size > 1 {
						return Err(PlaneCoordinateError::MissingDimension(dimension).into());
					}
				}
				Some(position) => {
					if position < start || position >= start + size {
						return Err(PlaneCoordinateError::CoordinateOutOfRange(dimension).into());
					}
				}
			},
			None => {
				if plane.is_valid(dimension) {
					return Err(PlaneCoordinateError::SurplusDimension(dimension).into());
				}
			}
		}
	}

	Ok(())
}

/// Determine the pixel type for a plane by probing a sub-block of its
/// channel.
pub(crate) fn try_get_pixel_type<R: SubBlockRepository + ?Sized>(
	repository: &R,
	plane: &Coordinate,
) -> Result<PixelType> {
	let statistics = repository.statistics();
	let channel = plane
		.position(Dimension::C)
		.or_else(|| statistics.dim_bounds.interval(Dimension::C).map(|(start, _)| start))
		.unwrap_or(i32::MIN);

	let entry = repository
		.subblock_info_of_arbitrary_subblock_in_channel(channel)
		.ok_or(Error::CouldNotDeterminePixelType)?;
	match entry.pixel_type() {
		PixelType::Invalid => Err(Error::CouldNotDeterminePixelType),
		pixel_type => Ok(pixel_type),
	}
}

/// Whether `entry` passes the scene filter.
pub(crate) fn scene_filter_accepts(filter: Option<&BTreeSet<i32>>, entry: &SubBlockEntry) -> bool {
	match (filter, entry.coordinate.position(Dimension::S)) {
		(Some(filter), Some(scene)) => filter.contains(&scene),
		// entries without an S coordinate are unaffected by the filter
		_ => true,
	}
}

/// Stable-sort `(index, entry)` selections by M ascending, invalid M first.
pub(crate) fn sort_by_m(selection: &mut [(usize, SubBlockEntry)]) {
	selection.sort_by_key(|(_, entry)| entry.m_index().map_or((false, 0), |m| (true, m)));
}

/// Fetch the decoded bitmap of a sub-block, through the cache if one is
/// configured.
pub(crate) fn get_subblock_bitmap<R: SubBlockRepository + ?Sized>(
	repository: &R,
	config: &LibConfig,
	options: &AccessorOptions<'_>,
	index: usize,
	entry: &SubBlockEntry,
) -> Result<Arc<Bitmap>> {
	let cacheable = options.cache.is_some()
		&& (!options.only_use_cache_for_compressed_data
			|| entry.compression() != CompressionMode::Uncompressed);

	if cacheable {
		if let Some(cache) = options.cache {
			if let Some(bitmap) = cache.get(index) {
				return Ok(bitmap);
			}
		}
	}

	let subblock = repository.read_subblock(index)?;
	let bitmap = Arc::new(subblock.create_bitmap(config)?);
	if cacheable {
		if let Some(cache) = options.cache {
			cache.add(index, Arc::clone(&bitmap));
		}
	}

	Ok(bitmap)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinate::DimBounds;

	fn statistics(bounds: DimBounds) -> SubBlockStatistics {
		SubBlockStatistics {
			dim_bounds: bounds,
			..Default::default()
		}
	}

	#[test]
	fn plane_with_scene_dimension_is_invalid() {
		let stats = statistics(DimBounds::new());
		let plane: Coordinate = [(Dimension::S, 0)].into_iter().collect();
		assert!(matches!(
			check_plane_coordinates(&stats, &plane),
			Err(Error::InvalidPlaneCoordinate(PlaneCoordinateError::InvalidDimension(_)))
		));
	}

	#[test]
	fn bounded_dimension_must_be_given_unless_size_one() {
		let mut bounds = DimBounds::new();
		bounds.set(Dimension::C, 0, 2).set(Dimension::T, 0, 1);
		let stats = statistics(bounds);

		// T may be omitted (size 1), C may not
		let plane = Coordinate::new();
		assert!(matches!(
			check_plane_coordinates(&stats, &plane),
			Err(Error::InvalidPlaneCoordinate(PlaneCoordinateError::MissingDimension(
				Dimension::C
			)))
		));

		let plane: Coordinate = [(Dimension::C, 1)].into_iter().collect();
		check_plane_coordinates(&stats, &plane).expect("valid");

		let plane: Coordinate = [(Dimension::C, 2)].into_iter().collect();
		assert!(matches!(
			check_plane_coordinates(&stats, &plane),
			Err(Error::InvalidPlaneCoordinate(PlaneCoordinateError::CoordinateOutOfRange(
				Dimension::C
			)))
		));
	}

	#[test]
	fn surplus_dimension_is_rejected() {
		let mut bounds = DimBounds::new();
		bounds.set(Dimension::C, 0, 1);
		let stats = statistics(bounds);

		let plane: Coordinate = [(Dimension::Z, 0)].into_iter().collect();
		assert!(matches!(
			check_plane_coordinates(&stats, &plane),
			Err(Error::InvalidPlaneCoordinate(PlaneCoordinateError::SurplusDimension(
				Dimension::Z
			)))
		));
	}

	#[test]
	fn m_sort_puts_invalid_first_and_is_stable() {
		let entry = |m: i32| SubBlockEntry {
			coordinate: Coordinate::new(),
			m_index: m,
			x: 0,
			y: 0,
			width: 1,
			height: 1,
			stored_width: 1,
			stored_height: 1,
			pixel_type_raw: 0,
			compression_raw: 0,
			pyramid_type_byte: 0,
			file_position: 0,
		};

		let mut selection = vec![
			(0, entry(5)),
			(1, entry(SubBlockEntry::M_INDEX_INVALID)),
			(2, entry(-1)),
			(3, entry(i32::MAX)),
		];
		sort_by_m(&mut selection);
		let order: Vec<usize> = selection.iter().map(|(i, _)| *i).collect();
		assert_eq!(order, vec![1, 3, 2, 0]);
	}
}
