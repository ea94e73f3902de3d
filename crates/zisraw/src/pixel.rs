//! Pixel types, compression modes, and the pyramid-type byte.
//!
//! Compression is stored on disk as a raw 32-bit value. Unrecognised values
//! are surfaced as [`CompressionMode::Invalid`] but the raw value is kept, so
//! entries round-trip unchanged.

use std::fmt;

/// Pixel representation of a bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelType {
	/// 8-bit grayscale.
	Gray8,
	/// 16-bit grayscale.
	Gray16,
	/// 32-bit float grayscale.
	Gray32Float,
	/// 8-bit BGR.
	Bgr24,
	/// 16-bit BGR.
	Bgr48,
	/// 8-bit BGRA.
	Bgra32,
	/// Not a recognised pixel type.
	Invalid,
}

impl PixelType {
	/// Decode the on-disk representation.
	pub fn from_raw(raw: i32) -> Self {
		match raw {
			0 => PixelType::Gray8,
			1 => PixelType::Gray16,
			2 => PixelType::Gray32Float,
			3 => PixelType::Bgr24,
			4 => PixelType::Bgr48,
			8 => PixelType::Bgra32,
			_ => PixelType::Invalid,
		}
	}

	/// The on-disk representation, -1 for [`PixelType::Invalid`].
	pub const fn to_raw(self) -> i32 {
		match self {
			PixelType::Gray8 => 0,
			PixelType::Gray16 => 1,
			PixelType::Gray32Float => 2,
			PixelType::Bgr24 => 3,
			PixelType::Bgr48 => 4,
			PixelType::Bgra32 => 8,
			PixelType::Invalid => -1,
		}
	}

	/// Bytes per pixel, `None` for [`PixelType::Invalid`].
	pub const fn bytes_per_pixel(self) -> Option<u32> {
		Some(match self {
			PixelType::Gray8 => 1,
			PixelType::Gray16 => 2,
			PixelType::Gray32Float => 4,
			PixelType::Bgr24 => 3,
			PixelType::Bgr48 => 6,
			PixelType::Bgra32 => 4,
			PixelType::Invalid => return None,
		})
	}
}

impl fmt::Display for PixelType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			PixelType::Gray8 => "Gray8",
			PixelType::Gray16 => "Gray16",
			PixelType::Gray32Float => "Gray32Float",
			PixelType::Bgr24 => "Bgr24",
			PixelType::Bgr48 => "Bgr48",
			PixelType::Bgra32 => "Bgra32",
			PixelType::Invalid => "Invalid",
		};
		f.write_str(name)
	}
}

/// How a sub-block's pixel data is compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionMode {
	/// No compression; pixel data is stored verbatim.
	Uncompressed,
	/// JPEG (legacy, decode-only).
	Jpg,
	/// LZW (legacy, decode-only).
	Lzw,
	/// JPEG XR.
	JpgXr,
	/// Zstandard, bare frame.
	Zstd0,
	/// Zstandard with a small header (optional hi-lo byte packing).
	Zstd1,
	/// Not a recognised compression mode.
	Invalid,
}

impl CompressionMode {
	/// Decode the on-disk representation.
	pub fn from_raw(raw: i32) -> Self {
		match raw {
			0 => CompressionMode::Uncompressed,
			1 => CompressionMode::Jpg,
			2 => CompressionMode::Lzw,
			4 => CompressionMode::JpgXr,
			5 => CompressionMode::Zstd0,
			6 => CompressionMode::Zstd1,
			_ => CompressionMode::Invalid,
		}
	}

	/// The on-disk representation, `None` for [`CompressionMode::Invalid`]
	/// (whose raw value must be taken from where it was parsed).
	pub const fn to_raw(self) -> Option<i32> {
		Some(match self {
			CompressionMode::Uncompressed => 0,
			CompressionMode::Jpg => 1,
			CompressionMode::Lzw => 2,
			CompressionMode::JpgXr => 4,
			CompressionMode::Zstd0 => 5,
			CompressionMode::Zstd1 => 6,
			CompressionMode::Invalid => return None,
		})
	}
}

impl fmt::Display for CompressionMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			CompressionMode::Uncompressed => "uncompressed",
			CompressionMode::Jpg => "jpg",
			CompressionMode::Lzw => "lzw",
			CompressionMode::JpgXr => "jpgxr",
			CompressionMode::Zstd0 => "zstd0",
			CompressionMode::Zstd1 => "zstd1",
			CompressionMode::Invalid => "invalid",
		};
		f.write_str(name)
	}
}

/// The "pyramid type" byte from the reserved area of a `DV` directory entry.
///
/// Considered legacy; it is preserved on round-trip but never consulted for
/// pyramid classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PyramidType {
	/// Not a pyramid sub-block.
	#[default]
	None,
	/// A single minified sub-block.
	SingleSubBlock,
	/// A minified sub-block combining several layer-0 sub-blocks.
	MultiSubBlock,
	/// Unrecognised value.
	Invalid,
}

impl PyramidType {
	/// Decode the on-disk byte.
	pub fn from_byte(byte: u8) -> Self {
		match byte {
			0 => PyramidType::None,
			1 => PyramidType::SingleSubBlock,
			2 => PyramidType::MultiSubBlock,
			_ => PyramidType::Invalid,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pixel_type_raw_roundtrip() {
		for raw in [0, 1, 2, 3, 4, 8] {
			assert_eq!(PixelType::from_raw(raw).to_raw(), raw);
		}
		assert_eq!(PixelType::from_raw(7), PixelType::Invalid);
	}

	#[test]
	fn unknown_compression_is_invalid() {
		assert_eq!(CompressionMode::from_raw(3), CompressionMode::Invalid);
		assert_eq!(CompressionMode::from_raw(999), CompressionMode::Invalid);
		assert_eq!(CompressionMode::from_raw(6), CompressionMode::Zstd1);
	}
}
