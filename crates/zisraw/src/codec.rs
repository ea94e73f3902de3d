//! Pixel codecs: the decoder seam and the built-in Zstandard codecs.
//!
//! `Zstd0` is a bare Zstandard frame over the pixel data. `Zstd1` prefixes a
//! small header (1 or 3 bytes) which may request hi-lo byte packing, where
//! all low bytes of the 16-bit samples are stored before all high bytes.
//!
//! JPEG XR (and the legacy JPEG/LZW modes) are not implemented here; a
//! decoder can be plugged into [`LibConfig`].

use zstd_safe::CCtx;

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::map_zstd_error;
use crate::pixel::{CompressionMode, PixelType};

/// Decodes compressed pixel data into a bitmap.
pub trait Decoder: Send + Sync {
	/// Decode `data` into a bitmap of the given size and pixel type.
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32)
		-> Result<Bitmap>;
}

fn expected_size(pixel_type: PixelType, width: u32, height: u32) -> Result<usize> {
	let bpp = pixel_type
		.bytes_per_pixel()
		.ok_or(Error::Codec("cannot decode into an invalid pixel type".into()))?;
	Ok(width as usize * height as usize * bpp as usize)
}

fn zstd_err(code: usize) -> Error {
	Error::Codec(map_zstd_error(code).to_string().into())
}

fn is_16bit(pixel_type: PixelType) -> bool {
	matches!(pixel_type, PixelType::Gray16 | PixelType::Bgr48)
}

/// Interleave a hi-lo packed buffer back into native 16-bit samples.
fn hilo_unpack(packed: &[u8]) -> Result<Vec<u8>> {
	if packed.len() % 2 != 0 {
		return Err(Error::Codec("hi-lo packed data with odd length".into()));
	}

	let half = packed.len() / 2;
	let mut out = vec![0u8; packed.len()];
	for i in 0..half {
		out[2 * i] = packed[i];
		out[2 * i + 1] = packed[half + i];
	}

	Ok(out)
}

/// Split native 16-bit samples into a hi-lo packed buffer.
fn hilo_pack(data: &[u8]) -> Result<Vec<u8>> {
	if data.len() % 2 != 0 {
		return Err(Error::Codec("cannot hi-lo pack data with odd length".into()));
	}

	let half = data.len() / 2;
	let mut out = vec![0u8; data.len()];
	for i in 0..half {
		out[i] = data[2 * i];
		out[half + i] = data[2 * i + 1];
	}

	Ok(out)
}

fn zstd_decompress(data: &[u8], capacity: usize) -> Result<Vec<u8>> {
	zstd::bulk::decompress(data, capacity)
		.map_err(|err| Error::Codec(format!("zstd decompression failed: {err}").into()))
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
	let mut zstd = CCtx::try_create()
		.ok_or(Error::Codec("failed allocating zstd context".into()))?;
	zstd.init(level).map_err(zstd_err)?;

	// always compress to a buffer in memory, slightly larger than the input
	let mut buffer: Vec<u8> = Vec::with_capacity(data.len() + 1024.max(data.len() / 10));
	zstd.compress2(&mut buffer, data).map_err(zstd_err)?;
	Ok(buffer)
}

/// Decode a `Zstd0` payload (a bare Zstandard frame).
pub fn decode_zstd0(data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap> {
	let size = expected_size(pixel_type, width, height)?;
	let pixels = zstd_decompress(data, size)?;
	Bitmap::from_data(pixel_type, width, height, pixels)
}

/// Decode a `Zstd1` payload (header, then a Zstandard frame).
pub fn decode_zstd1(data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap> {
	let &[header_size, ..] = data else {
		return Err(Error::Codec("zstd1 payload is empty".into()));
	};
	let header_size = header_size as usize;
	if header_size < 1 || header_size > data.len() {
		return Err(Error::Codec("zstd1 header size out of range".into()));
	}

	// header byte 1 = chunk type, byte 2 bit 0 = hi-lo byte packing
	let hilo_packed = header_size >= 3 && data[1] == 1 && (data[2] & 1) != 0;
	if hilo_packed && !is_16bit(pixel_type) {
		return Err(Error::Codec(
			format!("hi-lo byte packing is not applicable to {pixel_type}").into(),
		));
	}

	let size = expected_size(pixel_type, width, height)?;
	let raw = zstd_decompress(&data[header_size..], size)?;
	let pixels = if hilo_packed { hilo_unpack(&raw)? } else { raw };
	Bitmap::from_data(pixel_type, width, height, pixels)
}

/// The built-in `Zstd0` decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zstd0Decoder;

impl Decoder for Zstd0Decoder {
	fn decode(
		&self,
		data: &[u8],
		pixel_type: PixelType,
		width: u32,
		height: u32,
	) -> Result<Bitmap> {
		decode_zstd0(data, pixel_type, width, height)
	}
}

/// The built-in `Zstd1` decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zstd1Decoder;

impl Decoder for Zstd1Decoder {
	fn decode(
		&self,
		data: &[u8],
		pixel_type: PixelType,
		width: u32,
		height: u32,
	) -> Result<Bitmap> {
		decode_zstd1(data, pixel_type, width, height)
	}
}

/// Parameters for encoding sub-block pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressOptions {
	/// The compression mode to use.
	pub mode: CompressionMode,
	/// Explicit compression level, codec default if `None`.
	pub explicit_level: Option<i32>,
	/// Apply hi-lo byte packing before compression (`Zstd1` only).
	pub hi_lo_byte_unpack: bool,
}

impl Default for CompressOptions {
	fn default() -> Self {
		Self {
			mode: CompressionMode::Uncompressed,
			explicit_level: None,
			hi_lo_byte_unpack: false,
		}
	}
}

/// Encode pixel data according to `options`, producing the sub-block payload.
pub fn encode_subblock_data(
	options: &CompressOptions,
	pixels: &[u8],
	pixel_type: PixelType,
) -> Result<Vec<u8>> {
	let level = options.explicit_level.unwrap_or(0);
	match options.mode {
		CompressionMode::Uncompressed => Ok(pixels.to_vec()),
		CompressionMode::Zstd0 => zstd_compress(pixels, level),
		CompressionMode::Zstd1 => {
			let pack = options.hi_lo_byte_unpack;
			if pack && !is_16bit(pixel_type) {
				return Err(Error::Codec(
					format!("hi-lo byte packing is not applicable to {pixel_type}").into(),
				));
			}

			let packed;
			let input = if pack {
				packed = hilo_pack(pixels)?;
				&packed
			} else {
				pixels
			};

			let mut out = vec![3u8, 1, u8::from(pack)];
			out.extend(zstd_compress(input, level)?);
			Ok(out)
		}
		mode => Err(Error::Codec(
			format!("encoding with compression mode '{mode}' is not supported").into(),
		)),
	}
}

/// Collaborators passed to readers and writers: the pluggable decoders.
///
/// There is no process-wide state; construct one of these (the default has
/// the Zstandard codecs built in and nothing else) and hand it to whoever
/// decodes bitmaps.
#[derive(Default)]
pub struct LibConfig {
	jpgxr_decoder: Option<Box<dyn Decoder>>,
}

impl std::fmt::Debug for LibConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LibConfig")
			.field("jpgxr_decoder", &self.jpgxr_decoder.is_some())
			.finish()
	}
}

impl LibConfig {
	/// The default configuration: Zstandard built in, no JPEG XR.
	pub fn new() -> Self {
		Self::default()
	}

	/// Plug in a JPEG XR decoder.
	pub fn with_jpgxr_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
		self.jpgxr_decoder = Some(decoder);
		self
	}

	/// Decode a sub-block payload according to its raw compression value.
	pub fn decode(
		&self,
		compression_raw: i32,
		data: &[u8],
		pixel_type: PixelType,
		width: u32,
		height: u32,
	) -> Result<Bitmap> {
		match CompressionMode::from_raw(compression_raw) {
			CompressionMode::Uncompressed => {
				Bitmap::from_data(pixel_type, width, height, data.to_vec())
			}
			CompressionMode::Zstd0 => decode_zstd0(data, pixel_type, width, height),
			CompressionMode::Zstd1 => decode_zstd1(data, pixel_type, width, height),
			CompressionMode::JpgXr => self
				.jpgxr_decoder
				.as_ref()
				.ok_or(Error::Codec("no JPEG XR decoder configured".into()))?
				.decode(data, pixel_type, width, height),
			mode => Err(Error::Codec(
				format!("no decoder for compression mode '{mode}' (raw {compression_raw})").into(),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zstd0_roundtrip() {
		let pixels: Vec<u8> = (0u8..16).collect();
		let options = CompressOptions {
			mode: CompressionMode::Zstd0,
			explicit_level: Some(3),
			hi_lo_byte_unpack: false,
		};
		let payload = encode_subblock_data(&options, &pixels, PixelType::Gray8).expect("encode");
		let bitmap = decode_zstd0(&payload, PixelType::Gray8, 4, 4).expect("decode");
		assert_eq!(bitmap.data(), &pixels[..]);
	}

	#[test]
	fn zstd1_roundtrip_with_hilo_packing() {
		let pixels: Vec<u8> = (0u8..32).collect();
		let options = CompressOptions {
			mode: CompressionMode::Zstd1,
			explicit_level: None,
			hi_lo_byte_unpack: true,
		};
		let payload = encode_subblock_data(&options, &pixels, PixelType::Gray16).expect("encode");
		assert_eq!(&payload[..3], &[3, 1, 1]);

		let bitmap = decode_zstd1(&payload, PixelType::Gray16, 4, 4).expect("decode");
		assert_eq!(bitmap.data(), &pixels[..]);
	}

	#[test]
	fn hilo_packing_rejects_8bit_types() {
		let options = CompressOptions {
			mode: CompressionMode::Zstd1,
			explicit_level: None,
			hi_lo_byte_unpack: true,
		};
		assert!(encode_subblock_data(&options, &[0; 4], PixelType::Gray8).is_err());
	}

	#[test]
	fn hilo_pack_unpack_are_inverses() {
		let data: Vec<u8> = (0u8..10).collect();
		assert_eq!(hilo_unpack(&hilo_pack(&data).expect("pack")).expect("unpack"), data);
	}

	#[test]
	fn unconfigured_jpgxr_is_a_codec_error() {
		let config = LibConfig::new();
		let raw = CompressionMode::JpgXr.to_raw().expect("raw");
		assert!(matches!(
			config.decode(raw, &[], PixelType::Gray8, 1, 1),
			Err(Error::Codec(_))
		));
	}
}
