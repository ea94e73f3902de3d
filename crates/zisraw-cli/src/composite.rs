use std::fs::File;
use std::io::Write;

use miette::{IntoDiagnostic, Report, Result};
use tracing::info;
use zisraw::accessor::{AccessorOptions, SingleChannelScalingTileAccessor, SingleChannelTileAccessor};
use zisraw::bitmap::RgbFloatColor;
use zisraw::codec::LibConfig;
use zisraw::decode::{Reader, ReaderOptions, SubBlockRepository};
use zisraw::text::{parse_plane_coordinate, parse_roi};

use crate::args::CompositeArgs;

pub fn composite(args: CompositeArgs) -> Result<()> {
	let file = File::open(&args.file).into_diagnostic()?;
	let reader = Reader::open(file, &ReaderOptions::lax()).map_err(Report::new)?;

	let plane = parse_plane_coordinate(&args.plane).map_err(Report::new)?;
	let roi = parse_roi(&args.roi)
		.map_err(Report::new)?
		.resolve(&reader.statistics());
	info!(?roi, %plane, zoom = args.zoom, "composing");

	let config = LibConfig::new();
	let options = AccessorOptions {
		background_color: args
			.background
			.map_or(RgbFloatColor::none(), RgbFloatColor::gray),
		draw_tile_border: args.tile_border,
		use_visibility_check_optimization: args.visibility_optimization,
		..Default::default()
	};

	let bitmap = if args.zoom >= 1.0 {
		SingleChannelTileAccessor::new(&reader, &config)
			.get(&roi, &plane, &options)
			.map_err(Report::new)?
	} else {
		SingleChannelScalingTileAccessor::new(&reader, &config)
			.get(&roi, &plane, args.zoom, &options)
			.map_err(Report::new)?
	};

	let mut output = File::create(&args.output).into_diagnostic()?;
	output.write_all(bitmap.data()).into_diagnostic()?;
	println!(
		"{}x{} {} ({} bytes) -> {}",
		bitmap.width(),
		bitmap.height(),
		bitmap.pixel_type(),
		bitmap.data().len(),
		args.output.display()
	);

	Ok(())
}
