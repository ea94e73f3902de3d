//! Sub-block directory entries: the `DV` and legacy `DE` wire schemas and the
//! in-memory model.
//!
//! The parser recognises both schemas; the emitter only ever produces `DV`.

use deku::prelude::*;

use crate::constants::MAX_DIMENSION_COUNT;
use crate::coordinate::{Coordinate, Dimension};
use crate::error::Error;
use crate::error::Result as CzResult;
use crate::geometry::{IntRect, IntSize};
use crate::pixel::{CompressionMode, PixelType, PyramidType};

/// One dimension entry within a `DV` directory entry (20 bytes).
#[derive(Clone, Copy, Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct DimensionEntryDv {
	/// Dimension name; only the first byte is significant.
	pub dimension: [u8; 4],
	/// Logical start.
	pub start: i32,
	/// Logical size.
	pub size: i32,
	/// Physical start coordinate. Carried, not interpreted.
	pub start_coordinate: f32,
	/// Stored size; 0 means "equal to size".
	pub stored_size: i32,
}

impl DimensionEntryDv {
	/// New entry with a zero start coordinate.
	pub fn new(dimension: char, start: i32, size: i32, stored_size: i32) -> Self {
		Self {
			dimension: [dimension as u8, 0, 0, 0],
			start,
			size,
			start_coordinate: 0.0,
			stored_size,
		}
	}

	/// The dimension character, uppercased.
	pub fn dimension_char(&self) -> char {
		(self.dimension[0] as char).to_ascii_uppercase()
	}

	/// The effective stored size (resolving the 0 shorthand).
	pub fn effective_stored_size(&self) -> i32 {
		if self.stored_size != 0 {
			self.stored_size
		} else {
			self.size
		}
	}
}

/// A `DV`-schema directory entry: 32 fixed bytes plus the dimension entries.
#[derive(Clone, Debug, PartialEq, DekuRead, DekuWrite)]
pub struct DirectoryEntryDv {
	/// Schema marker, `DV`.
	#[deku(assert = "*schema == *b\"DV\"")]
	pub schema: [u8; 2],
	/// Raw pixel type.
	#[deku(endian = "little")]
	pub pixel_type: i32,
	/// Absolute offset of the sub-block segment.
	#[deku(endian = "little")]
	pub file_position: i64,
	/// File part, 0 for single-file documents.
	#[deku(endian = "little")]
	pub file_part: i32,
	/// Raw compression mode.
	#[deku(endian = "little")]
	pub compression: i32,
	/// Reserved; byte 0 carries the legacy pyramid-type.
	pub spare: [u8; 6],
	/// Number of dimension entries, 1..=40.
	#[deku(
		endian = "little",
		assert = "*dimension_count >= 1 && *dimension_count <= MAX_DIMENSION_COUNT as i32"
	)]
	pub dimension_count: i32,
	/// The dimension entries.
	#[deku(count = "*dimension_count as usize")]
	pub dimension_entries: Vec<DimensionEntryDv>,
}

impl DirectoryEntryDv {
	/// Size of this entry on disk.
	pub fn wire_size(&self) -> u64 {
		32 + 20 * self.dimension_entries.len() as u64
	}
}

/// A legacy `DE`-schema directory entry, fixed 128 bytes.
///
/// Decoded for compatibility, never emitted.
#[derive(Clone, Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct DirectoryEntryDe {
	/// Schema marker, `DE`.
	#[deku(assert = "*schema == *b\"DE\"")]
	pub schema: [u8; 2],
	/// Raw pixel type.
	pub pixel_type: i32,
	/// Stored width.
	pub size_x_stored: i32,
	/// Stored height.
	pub size_y_stored: i32,
	/// Padding.
	pub pad: [u8; 2],
	/// Logical X start.
	pub start_x: i32,
	/// Logical width.
	pub size_x: i32,
	/// Logical Y start.
	pub start_y: i32,
	/// Logical height.
	pub size_y: i32,
	/// C position.
	pub start_c: i32,
	/// C size.
	pub size_c: i32,
	/// Z position.
	pub start_z: i32,
	/// Z size.
	pub size_z: i32,
	/// T position.
	pub start_t: i32,
	/// T size.
	pub size_t: i32,
	/// S position.
	pub start_s: i32,
	/// R position.
	pub start_r: i32,
	/// I position.
	pub start_i: i32,
	/// B position.
	pub start_b: i32,
	/// Raw compression mode.
	pub compression: i32,
	/// M position.
	pub start_m: i32,
	/// Absolute offset of the sub-block segment.
	pub file_position: i64,
	/// File part.
	pub file_part: i32,
	/// Dimension order (unused).
	pub dimension_order: [u8; 16],
	/// H position.
	pub start_h: i32,
	/// Reserved.
	pub start_10: i32,
	/// Reserved.
	pub start_11: i32,
	/// Reserved.
	pub start_12: i32,
	/// Reserved.
	pub start_13: i32,
}

/// Options controlling sub-block directory parsing. The default is lax.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
	/// Require the X and Y dimensions to be present on every entry.
	pub dimension_xy_must_be_present: bool,
	/// Require size 1 for every dimension other than X, Y and M.
	pub dimension_other_than_m_must_have_size_one: bool,
	/// Require stored size 1 for every dimension other than X, Y and M.
	pub physical_dimension_other_than_m_must_have_size_one: bool,
	/// Require size 1 for M on every entry.
	pub dimension_m_must_have_size_one: bool,
	/// Require size 1 for M except on pyramid entries (stored < logical).
	pub dimension_m_must_have_size_one_except_pyramid: bool,
}

impl ParseOptions {
	/// Lax parsing: no additional checks. This is the default.
	pub fn lax() -> Self {
		Self::default()
	}

	/// Strict parsing: all checks enabled.
	pub fn strict() -> Self {
		Self {
			dimension_xy_must_be_present: true,
			dimension_other_than_m_must_have_size_one: true,
			physical_dimension_other_than_m_must_have_size_one: true,
			dimension_m_must_have_size_one: true,
			dimension_m_must_have_size_one_except_pyramid: false,
		}
	}
}

/// An in-memory sub-block directory entry.
#[derive(Clone, Debug, PartialEq)]
pub struct SubBlockEntry {
	/// Plane coordinate (dimensions other than X, Y, M).
	pub coordinate: Coordinate,
	/// Raw mosaic index; see [`SubBlockEntry::M_INDEX_INVALID`].
	pub m_index: i32,
	/// Logical X (may be negative, stage coordinates).
	pub x: i32,
	/// Logical Y.
	pub y: i32,
	/// Logical width.
	pub width: i32,
	/// Logical height.
	pub height: i32,
	/// Stored width (≤ logical width; < for pyramid entries).
	pub stored_width: i32,
	/// Stored height.
	pub stored_height: i32,
	/// Raw pixel type.
	pub pixel_type_raw: i32,
	/// Raw compression mode; unrecognised values are preserved.
	pub compression_raw: i32,
	/// The legacy pyramid-type byte from the reserved area.
	pub pyramid_type_byte: u8,
	/// Absolute offset of the sub-block segment.
	pub file_position: u64,
}

impl SubBlockEntry {
	/// The canonical invalid-M sentinel.
	pub const M_INDEX_INVALID: i32 = i32::MIN;

	/// Whether the entry carries a meaningful M index.
	///
	/// Both `i32::MIN` and `i32::MAX` are used as "no M" by existing files;
	/// the raw value is preserved so either round-trips unchanged.
	pub fn is_m_index_valid(&self) -> bool {
		self.m_index != i32::MIN && self.m_index != i32::MAX
	}

	/// The M index, if valid.
	pub fn m_index(&self) -> Option<i32> {
		self.is_m_index_valid().then_some(self.m_index)
	}

	/// Whether stored equals logical size (a pyramid layer-0 entry).
	pub fn is_stored_size_equal_logical_size(&self) -> bool {
		self.width == self.stored_width && self.height == self.stored_height
	}

	/// The logical rectangle.
	pub fn logical_rect(&self) -> IntRect {
		IntRect::new(self.x, self.y, self.width, self.height)
	}

	/// The stored (physical) size.
	pub fn stored_size(&self) -> IntSize {
		IntSize::new(self.stored_width.max(0) as u32, self.stored_height.max(0) as u32)
	}

	/// Decoded pixel type.
	pub fn pixel_type(&self) -> PixelType {
		PixelType::from_raw(self.pixel_type_raw)
	}

	/// Decoded compression mode.
	pub fn compression(&self) -> CompressionMode {
		CompressionMode::from_raw(self.compression_raw)
	}

	/// Decoded legacy pyramid type.
	pub fn pyramid_type(&self) -> PyramidType {
		PyramidType::from_byte(self.pyramid_type_byte)
	}

	/// Build the model from a `DV` wire entry, applying the parse options.
	pub fn from_dv(dv: &DirectoryEntryDv, options: &ParseOptions) -> CzResult<Self> {
		let mut entry = Self {
			coordinate: Coordinate::new(),
			m_index: Self::M_INDEX_INVALID,
			x: 0,
			y: 0,
			width: 0,
			height: 0,
			stored_width: 0,
			stored_height: 0,
			pixel_type_raw: dv.pixel_type,
			compression_raw: dv.compression,
			pyramid_type_byte: dv.spare[0],
			file_position: dv.file_position.max(0) as u64,
		};

		let mut have_x = false;
		let mut have_y = false;
		let mut m_size = None;
		for dim in &dv.dimension_entries {
			match dim.dimension_char() {
				'X' => {
					entry.x = dim.start;
					entry.width = dim.size;
					entry.stored_width = dim.effective_stored_size();
					have_x = true;
				}
				'Y' => {
					entry.y = dim.start;
					entry.height = dim.size;
					entry.stored_height = dim.effective_stored_size();
					have_y = true;
				}
				'M' => {
					entry.m_index = dim.start;
					m_size = Some(dim.size);
				}
				c => {
					let Some(dimension) = Dimension::from_char(c) else {
						return Err(Error::CorruptedData(
							format!("directory entry with unknown dimension '{c}'").into(),
						));
					};
					if options.dimension_other_than_m_must_have_size_one && dim.size != 1 {
						return Err(Error::CorruptedData(
							format!("dimension '{c}' has size {} (expected 1)", dim.size).into(),
						));
					}
					if options.physical_dimension_other_than_m_must_have_size_one
						&& dim.effective_stored_size() != 1
					{
						return Err(Error::CorruptedData(
							format!(
								"dimension '{c}' has stored size {} (expected 1)",
								dim.effective_stored_size()
							)
							.into(),
						));
					}

					entry.coordinate.set(dimension, dim.start);
				}
			}
		}

		if options.dimension_xy_must_be_present && !(have_x && have_y) {
			return Err(Error::CorruptedData(
				"directory entry without X or Y dimension".into(),
			));
		}

		if let Some(m_size) = m_size {
			let is_pyramid = !entry.is_stored_size_equal_logical_size();
			if options.dimension_m_must_have_size_one && m_size != 1 {
				return Err(Error::CorruptedData(
					format!("dimension 'M' has size {m_size} (expected 1)").into(),
				));
			}
			if options.dimension_m_must_have_size_one_except_pyramid && !is_pyramid && m_size != 1 {
				return Err(Error::CorruptedData(
					format!("dimension 'M' has size {m_size} on a non-pyramid sub-block").into(),
				));
			}
		}

		Ok(entry)
	}

	/// Build the model from a legacy `DE` wire entry.
	pub fn from_de(de: &DirectoryEntryDe) -> Self {
		let mut coordinate = Coordinate::new();
		// DE has fixed slots; a slot is taken as present when its size is
		// non-zero (C, Z, T) or unconditionally for the start-only slots.
		if de.size_c > 0 {
			coordinate.set(Dimension::C, de.start_c);
		}
		if de.size_z > 0 {
			coordinate.set(Dimension::Z, de.start_z);
		}
		if de.size_t > 0 {
			coordinate.set(Dimension::T, de.start_t);
		}

		Self {
			coordinate,
			m_index: de.start_m,
			x: de.start_x,
			y: de.start_y,
			width: de.size_x,
			height: de.size_y,
			stored_width: de.size_x_stored,
			stored_height: de.size_y_stored,
			pixel_type_raw: de.pixel_type,
			compression_raw: de.compression,
			pyramid_type_byte: 0,
			file_position: de.file_position.max(0) as u64,
		}
	}

	/// Serialise the model as a `DV` wire entry.
	///
	/// Dimension order is: plane dimensions in canonical order, then X, then
	/// Y, then M (when valid).
	pub fn to_dv(&self) -> DirectoryEntryDv {
		let mut dimension_entries = Vec::with_capacity(self.coordinate.len() + 3);
		for (dimension, position) in self.coordinate.iter() {
			dimension_entries.push(DimensionEntryDv::new(dimension.to_char(), position, 1, 1));
		}
		dimension_entries.push(DimensionEntryDv::new('X', self.x, self.width, self.stored_width));
		dimension_entries.push(DimensionEntryDv::new('Y', self.y, self.height, self.stored_height));
		// only the canonical MIN sentinel means "no M entry"; a raw MAX
		// sentinel from a legacy file keeps its wire representation
		if self.m_index != Self::M_INDEX_INVALID {
			dimension_entries.push(DimensionEntryDv::new('M', self.m_index, 1, 1));
		}

		let mut spare = [0u8; 6];
		spare[0] = self.pyramid_type_byte;
		DirectoryEntryDv {
			schema: *b"DV",
			pixel_type: self.pixel_type_raw,
			file_position: self.file_position as i64,
			file_part: 0,
			compression: self.compression_raw,
			spare,
			dimension_count: dimension_entries.len() as i32,
			dimension_entries,
		}
	}

	/// Size of this entry's `DV` serialisation on disk.
	pub fn dv_wire_size(&self) -> u64 {
		let dims =
			self.coordinate.len() as u64 + 2 + u64::from(self.m_index != Self::M_INDEX_INVALID);
		32 + 20 * dims
	}

	/// Whether two entries address the same (coordinate, M) slot.
	pub fn same_slot(&self, other: &Self) -> bool {
		self.coordinate == other.coordinate
			&& self.m_index() == other.m_index()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use deku::{DekuContainerRead, DekuContainerWrite};

	fn sample_entry() -> SubBlockEntry {
		SubBlockEntry {
			coordinate: [(Dimension::C, 0), (Dimension::T, 2)].into_iter().collect(),
			m_index: 5,
			x: -10,
			y: 20,
			width: 512,
			height: 512,
			stored_width: 512,
			stored_height: 512,
			pixel_type_raw: PixelType::Gray16.to_raw(),
			compression_raw: 0,
			pyramid_type_byte: 0,
			file_position: 544,
		}
	}

	#[test]
	fn dv_roundtrip_preserves_entry() {
		let entry = sample_entry();
		let dv = entry.to_dv();
		assert_eq!(dv.wire_size(), entry.dv_wire_size());

		let bytes = dv.to_bytes().expect("serialise");
		assert_eq!(bytes.len() as u64, dv.wire_size());

		let (_, parsed) = DirectoryEntryDv::from_bytes((&bytes, 0)).expect("parse");
		let roundtripped =
			SubBlockEntry::from_dv(&parsed, &ParseOptions::strict()).expect("convert");
		assert_eq!(roundtripped, entry);
	}

	#[test]
	fn stored_size_zero_means_equal_to_size() {
		let dim = DimensionEntryDv {
			dimension: [b'X', 0, 0, 0],
			start: 0,
			size: 100,
			start_coordinate: 0.0,
			stored_size: 0,
		};
		assert_eq!(dim.effective_stored_size(), 100);
	}

	#[test]
	fn strict_mode_requires_xy() {
		let mut dv = sample_entry().to_dv();
		dv.dimension_entries.retain(|d| d.dimension_char() != 'X');
		dv.dimension_count -= 1;
		assert!(SubBlockEntry::from_dv(&dv, &ParseOptions::strict()).is_err());
		assert!(SubBlockEntry::from_dv(&dv, &ParseOptions::lax()).is_ok());
	}

	#[test]
	fn strict_mode_rejects_wide_plane_dimension() {
		let mut dv = sample_entry().to_dv();
		for dim in &mut dv.dimension_entries {
			if dim.dimension_char() == 'C' {
				dim.size = 3;
			}
		}
		assert!(SubBlockEntry::from_dv(&dv, &ParseOptions::strict()).is_err());
		assert!(SubBlockEntry::from_dv(&dv, &ParseOptions::lax()).is_ok());
	}

	#[test]
	fn max_sentinel_reads_as_invalid_m_but_roundtrips() {
		let mut entry = sample_entry();
		entry.m_index = i32::MAX;
		assert!(!entry.is_m_index_valid());
		assert_eq!(entry.m_index(), None);

		// the raw MAX sentinel keeps its wire representation
		let dv = entry.to_dv();
		let m = dv
			.dimension_entries
			.iter()
			.find(|d| d.dimension_char() == 'M')
			.expect("M entry kept");
		assert_eq!(m.start, i32::MAX);

		// the canonical MIN sentinel means "no M entry at all"
		entry.m_index = SubBlockEntry::M_INDEX_INVALID;
		let dv = entry.to_dv();
		assert!(!dv.dimension_entries.iter().any(|d| d.dimension_char() == 'M'));
	}

	#[test]
	fn dimension_count_out_of_range_fails_parse() {
		let mut dv = sample_entry().to_dv();
		dv.dimension_count = 41;
		// serialising with a mismatched count must not produce a parseable
		// entry: the assert fires on write as well
		assert!(dv.to_bytes().is_err());
	}
}
