//! Owned bitmaps and the pixel operations the accessors need.
//!
//! A bitmap is immutable once composed; sharing across threads is safe. The
//! operations here are deliberately simple: fill, clipped copy, tile border,
//! and nearest-neighbour resize.

use crate::error::{Error, Result};
use crate::geometry::{IntRect, IntSize};
use crate::pixel::PixelType;

/// An RGB colour with float channels; NaN channels mean "do not clear".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgbFloatColor {
	/// Red, 0.0..=1.0.
	pub r: f32,
	/// Green.
	pub g: f32,
	/// Blue.
	pub b: f32,
}

impl RgbFloatColor {
	/// The "do not clear" sentinel (all channels NaN).
	pub fn none() -> Self {
		Self {
			r: f32::NAN,
			g: f32::NAN,
			b: f32::NAN,
		}
	}

	/// A uniform gray value.
	pub fn gray(value: f32) -> Self {
		Self {
			r: value,
			g: value,
			b: value,
		}
	}

	/// Black.
	pub fn black() -> Self {
		Self::gray(0.0)
	}

	/// Whether all three channels are set (non-NaN).
	pub fn is_set(&self) -> bool {
		!self.r.is_nan() && !self.g.is_nan() && !self.b.is_nan()
	}
}

fn to_u8(value: f32) -> u8 {
	(value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn to_u16(value: f32) -> u16 {
	(value.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16
}

/// An owned pixel buffer with a pixel type, size, and stride.
#[derive(Clone, Debug, PartialEq)]
pub struct Bitmap {
	pixel_type: PixelType,
	width: u32,
	height: u32,
	stride: u32,
	data: Vec<u8>,
}

impl Bitmap {
	/// A zero-filled bitmap with a tight stride.
	pub fn new(pixel_type: PixelType, width: u32, height: u32) -> Result<Self> {
		let bpp = pixel_type
			.bytes_per_pixel()
			.ok_or(Error::InternalError("cannot allocate a bitmap of invalid pixel type"))?;
		let stride = width
			.checked_mul(bpp)
			.ok_or(Error::InternalError("bitmap too large"))?;
		let size = (stride as usize)
			.checked_mul(height as usize)
			.ok_or(Error::InternalError("bitmap too large"))?;

		Ok(Self {
			pixel_type,
			width,
			height,
			stride,
			data: vec![0; size],
		})
	}

	/// Wrap existing pixel data with a tight stride.
	pub fn from_data(pixel_type: PixelType, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
		let bitmap = Self::new(pixel_type, width, height)?;
		if data.len() != bitmap.data.len() {
			return Err(Error::Codec(
				format!(
					"pixel data size mismatch: expected {} bytes for {width}x{height} {pixel_type}, got {}",
					bitmap.data.len(),
					data.len()
				)
				.into(),
			));
		}

		Ok(Self { data, ..bitmap })
	}

	/// The pixel type.
	pub fn pixel_type(&self) -> PixelType {
		self.pixel_type
	}

	/// Width in pixels.
	pub fn width(&self) -> u32 {
		self.width
	}

	/// Height in pixels.
	pub fn height(&self) -> u32 {
		self.height
	}

	/// The size as an [`IntSize`].
	pub fn size(&self) -> IntSize {
		IntSize::new(self.width, self.height)
	}

	/// Bytes per row.
	pub fn stride(&self) -> u32 {
		self.stride
	}

	/// Bytes per pixel.
	pub fn bytes_per_pixel(&self) -> u32 {
		// the pixel type was validated at construction
		self.pixel_type.bytes_per_pixel().unwrap_or(0)
	}

	/// The raw pixel data, rows in top-down order.
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	/// Total size of the pixel data in bytes.
	pub fn data_size(&self) -> u64 {
		self.data.len() as u64
	}

	/// The bytes of one pixel.
	pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
		let bpp = self.bytes_per_pixel() as usize;
		let offset = y as usize * self.stride as usize + x as usize * bpp;
		&self.data[offset..offset + bpp]
	}

	fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
		let bpp = self.bytes_per_pixel() as usize;
		let offset = y as usize * self.stride as usize + x as usize * bpp;
		&mut self.data[offset..offset + bpp]
	}

	fn color_bytes(&self, color: &RgbFloatColor) -> Vec<u8> {
		match self.pixel_type {
			PixelType::Gray8 => vec![to_u8(color.r)],
			PixelType::Gray16 => to_u16(color.r).to_le_bytes().to_vec(),
			PixelType::Gray32Float => color.r.to_le_bytes().to_vec(),
			PixelType::Bgr24 => vec![to_u8(color.b), to_u8(color.g), to_u8(color.r)],
			PixelType::Bgr48 => {
				let mut bytes = Vec::with_capacity(6);
				bytes.extend(to_u16(color.b).to_le_bytes());
				bytes.extend(to_u16(color.g).to_le_bytes());
				bytes.extend(to_u16(color.r).to_le_bytes());
				bytes
			}
			PixelType::Bgra32 => vec![to_u8(color.b), to_u8(color.g), to_u8(color.r), 0xff],
			PixelType::Invalid => Vec::new(),
		}
	}

	/// Fill the whole bitmap with a colour. No-op if the colour is unset.
	pub fn fill(&mut self, color: &RgbFloatColor) {
		if !color.is_set() {
			return;
		}

		let pixel = self.color_bytes(color);
		if pixel.is_empty() {
			return;
		}

		for y in 0..self.height {
			for x in 0..self.width {
				self.pixel_mut(x, y).copy_from_slice(&pixel);
			}
		}
	}

	/// Copy `src` onto this bitmap with its top-left at `(dst_x, dst_y)`,
	/// clipping to both bitmaps. Pixel types must match.
	pub fn blit(&mut self, src: &Bitmap, dst_x: i32, dst_y: i32) -> Result<()> {
		if src.pixel_type != self.pixel_type {
			return Err(Error::InternalError("pixel type mismatch in bitmap copy"));
		}

		let dst_rect = IntRect::new(0, 0, self.width as i32, self.height as i32);
		let src_placed = IntRect::new(dst_x, dst_y, src.width as i32, src.height as i32);
		let overlap = dst_rect.intersect(&src_placed);
		if !overlap.is_valid() {
			return Ok(());
		}

		let bpp = self.bytes_per_pixel() as usize;
		let row_bytes = overlap.w as usize * bpp;
		for row in 0..overlap.h {
			let sy = (overlap.y + row - dst_y) as u32;
			let sx = (overlap.x - dst_x) as u32;
			let src_off = sy as usize * src.stride as usize + sx as usize * bpp;
			let dy = (overlap.y + row) as u32;
			let dst_off = dy as usize * self.stride as usize + overlap.x as usize * bpp;
			self.data[dst_off..dst_off + row_bytes]
				.copy_from_slice(&src.data[src_off..src_off + row_bytes]);
		}

		Ok(())
	}

	/// Draw a 1-pixel black border just inside `rect`, clipped to the bitmap.
	pub fn draw_border(&mut self, rect: &IntRect) {
		let bounds = IntRect::new(0, 0, self.width as i32, self.height as i32);
		let rect = bounds.intersect(rect);
		if !rect.is_valid() {
			return;
		}

		let pixel = self.color_bytes(&RgbFloatColor::black());
		if pixel.is_empty() {
			return;
		}

		for x in rect.x..rect.x + rect.w {
			self.pixel_mut(x as u32, rect.y as u32).copy_from_slice(&pixel);
			self.pixel_mut(x as u32, (rect.y + rect.h - 1) as u32)
				.copy_from_slice(&pixel);
		}
		for y in rect.y..rect.y + rect.h {
			self.pixel_mut(rect.x as u32, y as u32).copy_from_slice(&pixel);
			self.pixel_mut((rect.x + rect.w - 1) as u32, y as u32)
				.copy_from_slice(&pixel);
		}
	}

	/// Nearest-neighbour resize of `src_roi` within `src` onto `dst_roi`
	/// within this bitmap.
	///
	/// For each destination pixel the source position is
	/// `src_roi.origin + (d - dst_roi.origin) * src_roi.size / dst_roi.size`,
	/// floored and clipped; the pixel is copied verbatim.
	pub fn nearest_neighbor_blit(
		&mut self,
		src: &Bitmap,
		src_roi: (f64, f64, f64, f64),
		dst_roi: (f64, f64, f64, f64),
	) -> Result<()> {
		if src.pixel_type != self.pixel_type {
			return Err(Error::InternalError("pixel type mismatch in bitmap resize"));
		}

		let (sx0, sy0, sw, sh) = src_roi;
		let (dx0, dy0, dw, dh) = dst_roi;
		if dw <= 0.0 || dh <= 0.0 || sw <= 0.0 || sh <= 0.0 {
			return Ok(());
		}

		let x_start = dx0.floor().max(0.0) as i64;
		let x_end = ((dx0 + dw).ceil() as i64).min(i64::from(self.width));
		let y_start = dy0.floor().max(0.0) as i64;
		let y_end = ((dy0 + dh).ceil() as i64).min(i64::from(self.height));

		let bpp = self.bytes_per_pixel() as usize;
		for dy in y_start..y_end {
			let sy = (sy0 + (dy as f64 - dy0) * sh / dh).floor();
			let sy = (sy as i64).clamp(0, i64::from(src.height) - 1) as u32;
			for dx in x_start..x_end {
				let sx = (sx0 + (dx as f64 - dx0) * sw / dw).floor();
				let sx = (sx as i64).clamp(0, i64::from(src.width) - 1) as u32;

				let src_off = sy as usize * src.stride as usize + sx as usize * bpp;
				let dst_off = dy as usize * self.stride as usize + dx as usize * bpp;
				self.data[dst_off..dst_off + bpp]
					.copy_from_slice(&src.data[src_off..src_off + bpp]);
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fill_gray8_uses_red_channel() {
		let mut bitmap = Bitmap::new(PixelType::Gray8, 2, 2).expect("alloc");
		bitmap.fill(&RgbFloatColor::gray(1.0));
		assert!(bitmap.data().iter().all(|&b| b == 255));

		bitmap.fill(&RgbFloatColor::none());
		assert!(bitmap.data().iter().all(|&b| b == 255)); // unchanged
	}

	#[test]
	fn blit_clips_on_both_sides() {
		let mut dst = Bitmap::new(PixelType::Gray8, 3, 3).expect("alloc");
		let src = Bitmap::from_data(PixelType::Gray8, 2, 2, vec![9, 9, 9, 9]).expect("src");
		dst.blit(&src, 2, 2).expect("blit");
		assert_eq!(dst.pixel(2, 2), &[9]);
		assert_eq!(dst.pixel(1, 1), &[0]);

		dst.blit(&src, -1, -1).expect("blit");
		assert_eq!(dst.pixel(0, 0), &[9]);
	}

	#[test]
	fn blit_requires_matching_pixel_type() {
		let mut dst = Bitmap::new(PixelType::Gray8, 2, 2).expect("alloc");
		let src = Bitmap::new(PixelType::Gray16, 2, 2).expect("alloc");
		assert!(dst.blit(&src, 0, 0).is_err());
	}

	#[test]
	fn nearest_neighbor_identity_is_a_copy() {
		let src =
			Bitmap::from_data(PixelType::Gray8, 2, 2, vec![1, 2, 3, 4]).expect("src");
		let mut dst = Bitmap::new(PixelType::Gray8, 2, 2).expect("alloc");
		dst.nearest_neighbor_blit(&src, (0.0, 0.0, 2.0, 2.0), (0.0, 0.0, 2.0, 2.0))
			.expect("resize");
		assert_eq!(dst.data(), src.data());
	}

	#[test]
	fn nearest_neighbor_downscale_picks_floored_source() {
		let src = Bitmap::from_data(
			PixelType::Gray8,
			4,
			4,
			(0u8..16).collect::<Vec<_>>(),
		)
		.expect("src");
		let mut dst = Bitmap::new(PixelType::Gray8, 2, 2).expect("alloc");
		dst.nearest_neighbor_blit(&src, (0.0, 0.0, 4.0, 4.0), (0.0, 0.0, 2.0, 2.0))
			.expect("resize");
		assert_eq!(dst.data(), &[0, 2, 8, 10]);
	}
}
