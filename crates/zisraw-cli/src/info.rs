use std::fs::File;

use miette::{IntoDiagnostic, Report, Result};
use tracing::debug;
use zisraw::decode::{Reader, ReaderOptions, SubBlockRepository};

use crate::args::InfoArgs;

pub fn info(args: InfoArgs) -> Result<()> {
	debug!(file = ?args.file, "opening document");
	let file = File::open(&args.file).into_diagnostic()?;
	let reader = Reader::open(file, &ReaderOptions::lax()).map_err(Report::new)?;

	let header = reader.file_header();
	println!("File header:");
	println!("  version:              {}.{}", header.major, header.minor);
	println!("  primary file GUID:    {}", header.primary_file_guid);
	println!("  file GUID:            {}", header.file_guid);
	println!(
		"  sub-block directory:  {}",
		header
			.subblock_directory()
			.map_or("absent".into(), |p| p.to_string())
	);
	println!(
		"  metadata segment:     {}",
		header.metadata().map_or("absent".into(), |p| p.to_string())
	);
	println!(
		"  attachment directory: {}",
		header
			.attachment_directory()
			.map_or("absent".into(), |p| p.to_string())
	);

	let statistics = reader.statistics();
	println!();
	println!("Statistics:");
	println!("  sub-blocks:           {}", statistics.subblock_count);
	if let (Some(min), Some(max)) = (statistics.min_m_index, statistics.max_m_index) {
		println!("  M index:              {min}..={max}");
	}
	let bb = statistics.bounding_box;
	println!("  bounding box:         ({}, {}, {}, {})", bb.x, bb.y, bb.w, bb.h);
	let bb0 = statistics.bounding_box_layer0;
	println!("  layer-0 bounding box: ({}, {}, {}, {})", bb0.x, bb0.y, bb0.w, bb0.h);
	for (dimension, start, size) in statistics.dim_bounds.iter() {
		println!("  dimension {dimension}:          [{start}, {})", start + size);
	}
	for (scene, boxes) in &statistics.scene_bounding_boxes {
		let bb = boxes.bounding_box;
		println!("  scene {scene}: ({}, {}, {}, {})", bb.x, bb.y, bb.w, bb.h);
	}

	let pyramid = reader.pyramid_statistics();
	if !pyramid.scene_pyramid_statistics.is_empty() {
		println!();
		println!("Pyramid:");
		for (scene, histogram) in &pyramid.scene_pyramid_statistics {
			match scene {
				Some(scene) => println!("  scene {scene}:"),
				None => println!("  (no scene):"),
			}
			for bucket in histogram {
				if bucket.layer_info.is_layer0() {
					println!("    layer 0: {} sub-block(s)", bucket.count);
				} else if bucket.layer_info.is_not_representable() {
					println!("    not on a pyramid layer: {} sub-block(s)", bucket.count);
				} else {
					println!(
						"    layer {} (minification {}): {} sub-block(s)",
						bucket.layer_info.pyramid_layer_no,
						bucket.layer_info.minification_factor,
						bucket.count
					);
				}
			}
		}
	}

	if reader.attachment_count() > 0 {
		println!();
		println!("Attachments:");
		reader.enumerate_attachments(&mut |index, entry| {
			println!(
				"  #{index}: {} ({}) {}",
				entry.name_str(),
				entry.content_file_type_str(),
				entry.content_guid
			);
			true
		});
	}

	if args.subblocks {
		println!();
		println!("Sub-blocks:");
		reader.enumerate_subblocks(&mut |index, entry| {
			let rect = entry.logical_rect();
			let stored = entry.stored_size();
			println!(
				"  #{index}: {} M={} ({}, {}, {}, {}) stored {}x{} {} {}",
				entry.coordinate,
				entry
					.m_index()
					.map_or("-".into(), |m| m.to_string()),
				rect.x,
				rect.y,
				rect.w,
				rect.h,
				stored.w,
				stored.h,
				entry.pixel_type(),
				entry.compression(),
			);
			true
		});
	}

	Ok(())
}
