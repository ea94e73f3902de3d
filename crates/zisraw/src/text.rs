//! Textual forms: plane coordinates, ROIs, and compression options.
//!
//! - Plane coordinate: `C1T3`, `C0T-2`, `C1T44Z15H1` (no separators).
//! - ROI: `rel(x,y,w,h)` or `abs(x,y,w,h)`; `rel` is relative to the
//!   layer-0 bounding box origin.
//! - Compression options: `method:Key=Value;Key=Value`, e.g.
//!   `zstd1:ExplicitLevel=2;PreProcess=HiLoByteUnpack`.

use crate::codec::CompressOptions;
use crate::coordinate::{Coordinate, Dimension};
use crate::directory::SubBlockStatistics;
use crate::error::{Error, Result};
use crate::geometry::IntRect;
use crate::pixel::CompressionMode;

fn parse_error(what: &'static str, message: impl Into<String>) -> Error {
	Error::StringParse {
		what,
		message: message.into().into(),
	}
}

/// Parse a plane-coordinate string such as `C1T3`.
///
/// Dimension characters are from {Z, C, T, R, S, I, H, V, B}; values are
/// signed integers. Duplicate dimensions are rejected.
pub fn parse_plane_coordinate(input: &str) -> Result<Coordinate> {
	const WHAT: &str = "plane coordinate";
	let mut coordinate = Coordinate::new();
	let mut chars = input.chars().peekable();

	while let Some(c) = chars.next() {
		if c.is_whitespace() {
			continue;
		}

		let Some(dimension) = Dimension::from_char(c) else {
			return Err(parse_error(WHAT, format!("'{c}' is not a dimension")));
		};
		if coordinate.is_valid(dimension) {
			return Err(parse_error(WHAT, format!("dimension '{dimension}' given twice")));
		}

		let mut number = String::new();
		if chars.peek() == Some(&'-') || chars.peek() == Some(&'+') {
			number.push(chars.next().unwrap_or('+'));
		}
		while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
			number.push(chars.next().unwrap_or('0'));
		}

		let position: i32 = number
			.parse()
			.map_err(|_| parse_error(WHAT, format!("no value for dimension '{dimension}'")))?;
		coordinate.set(dimension, position);
	}

	if coordinate.is_empty() {
		return Err(parse_error(WHAT, "empty coordinate"));
	}

	Ok(coordinate)
}

/// A ROI that may be absolute or relative to the layer-0 bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoiSpec {
	/// Absolute coordinates.
	Abs(IntRect),
	/// Relative to the layer-0 bounding box origin.
	Rel(IntRect),
}

impl RoiSpec {
	/// Resolve the ROI to absolute coordinates.
	pub fn resolve(&self, statistics: &SubBlockStatistics) -> IntRect {
		match *self {
			RoiSpec::Abs(rect) => rect,
			RoiSpec::Rel(rect) => {
				let origin = statistics.bounding_box_layer0;
				IntRect::new(origin.x + rect.x, origin.y + rect.y, rect.w, rect.h)
			}
		}
	}
}

/// Parse a ROI string: `rel(x,y,w,h)` or `abs(x,y,w,h)`.
pub fn parse_roi(input: &str) -> Result<RoiSpec> {
	const WHAT: &str = "ROI";
	let input = input.trim();

	let (relative, rest) = if let Some(rest) = input.strip_prefix("rel") {
		(true, rest)
	} else if let Some(rest) = input.strip_prefix("abs") {
		(false, rest)
	} else {
		return Err(parse_error(WHAT, "expected 'rel(...)' or 'abs(...)'"));
	};

	let inner = rest
		.trim()
		.strip_prefix('(')
		.and_then(|r| r.trim_end().strip_suffix(')'))
		.ok_or_else(|| parse_error(WHAT, "expected parenthesised x,y,w,h"))?;

	let parts: Vec<i32> = inner
		.split(',')
		.map(|p| {
			p.trim()
				.parse::<i32>()
				.map_err(|_| parse_error(WHAT, format!("'{}' is not an integer", p.trim())))
		})
		.collect::<Result<_>>()?;
	let &[x, y, w, h] = parts.as_slice() else {
		return Err(parse_error(WHAT, "expected exactly four integers"));
	};
	if w <= 0 || h <= 0 {
		return Err(parse_error(WHAT, "width and height must be positive"));
	}

	let rect = IntRect::new(x, y, w, h);
	Ok(if relative { RoiSpec::Rel(rect) } else { RoiSpec::Abs(rect) })
}

/// Parse a compression-option string such as `zstd0:ExplicitLevel=3`.
pub fn parse_compression_options(input: &str) -> Result<CompressOptions> {
	const WHAT: &str = "compression options";
	let input = input.trim();
	let (method, params) = match input.split_once(':') {
		Some((method, params)) => (method.trim(), Some(params)),
		None => (input, None),
	};

	let mode = match method.to_ascii_lowercase().as_str() {
		"uncompressed" => CompressionMode::Uncompressed,
		"jpgxr" => CompressionMode::JpgXr,
		"zstd0" => CompressionMode::Zstd0,
		"zstd1" => CompressionMode::Zstd1,
		other => return Err(parse_error(WHAT, format!("unknown method '{other}'"))),
	};

	let mut options = CompressOptions {
		mode,
		..Default::default()
	};

	if let Some(params) = params {
		for param in params.split(';').filter(|p| !p.trim().is_empty()) {
			let (key, value) = param
				.split_once('=')
				.ok_or_else(|| parse_error(WHAT, format!("'{param}' is not Key=Value")))?;
			match key.trim().to_ascii_lowercase().as_str() {
				"explicitlevel" => {
					let level: i32 = value.trim().parse().map_err(|_| {
						parse_error(WHAT, format!("'{}' is not an integer level", value.trim()))
					})?;
					options.explicit_level = Some(level);
				}
				"preprocess" => match value.trim().to_ascii_lowercase().as_str() {
					"hilobyteunpack" => options.hi_lo_byte_unpack = true,
					"none" => options.hi_lo_byte_unpack = false,
					other => {
						return Err(parse_error(WHAT, format!("unknown pre-process '{other}'")));
					}
				},
				other => return Err(parse_error(WHAT, format!("unknown key '{other}'"))),
			}
		}
	}

	if options.hi_lo_byte_unpack && options.mode != CompressionMode::Zstd1 {
		return Err(parse_error(WHAT, "PreProcess is only valid for zstd1"));
	}

	Ok(options)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plane_coordinates_parse_with_signs_and_multiple_dimensions() {
		let c = parse_plane_coordinate("C1T3").expect("parse");
		assert_eq!(c.position(Dimension::C), Some(1));
		assert_eq!(c.position(Dimension::T), Some(3));

		let c = parse_plane_coordinate("C0T-2").expect("parse");
		assert_eq!(c.position(Dimension::T), Some(-2));

		let c = parse_plane_coordinate("C1T44Z15H1").expect("parse");
		assert_eq!(c.len(), 4);
		assert_eq!(c.position(Dimension::Z), Some(15));
	}

	#[test]
	fn plane_coordinate_rejects_m_and_garbage() {
		assert!(parse_plane_coordinate("M3").is_err());
		assert!(parse_plane_coordinate("X1Y2").is_err());
		assert!(parse_plane_coordinate("C").is_err());
		assert!(parse_plane_coordinate("").is_err());
		assert!(parse_plane_coordinate("C1C2").is_err());
	}

	#[test]
	fn roi_parses_and_resolves() {
		assert_eq!(
			parse_roi("abs(-1,2,3,4)").expect("parse"),
			RoiSpec::Abs(IntRect::new(-1, 2, 3, 4))
		);
		assert_eq!(
			parse_roi("rel( 0 , 0 , 10 , 10 )").expect("parse"),
			RoiSpec::Rel(IntRect::new(0, 0, 10, 10))
		);
		assert!(parse_roi("rel(0,0,0,10)").is_err());
		assert!(parse_roi("circle(0,0,1,1)").is_err());

		let statistics = SubBlockStatistics {
			bounding_box_layer0: IntRect::new(100, 200, 50, 50),
			..Default::default()
		};
		assert_eq!(
			parse_roi("rel(5,5,10,10)").expect("parse").resolve(&statistics),
			IntRect::new(105, 205, 10, 10)
		);
	}

	#[test]
	fn compression_options_parse() {
		let options = parse_compression_options("zstd0:ExplicitLevel=3").expect("parse");
		assert_eq!(options.mode, CompressionMode::Zstd0);
		assert_eq!(options.explicit_level, Some(3));

		let options =
			parse_compression_options("zstd1:ExplicitLevel=2;PreProcess=HiLoByteUnpack")
				.expect("parse");
		assert_eq!(options.mode, CompressionMode::Zstd1);
		assert!(options.hi_lo_byte_unpack);

		let options = parse_compression_options("uncompressed").expect("parse");
		assert_eq!(options.mode, CompressionMode::Uncompressed);

		assert!(parse_compression_options("zstd0:PreProcess=HiLoByteUnpack").is_err());
		assert!(parse_compression_options("lz4").is_err());
	}
}
