use std::fs::{self, File};
use std::io::Write;

use miette::{IntoDiagnostic, Report, Result};
use tracing::{debug, info};
use zisraw::codec::LibConfig;
use zisraw::decode::{Reader, ReaderOptions, SubBlockRepository};

use crate::args::{DumpAttachmentArgs, DumpMetadataArgs, DumpSubBlockArgs};

fn open(path: &std::path::Path) -> Result<Reader<File>> {
	let file = File::open(path).into_diagnostic()?;
	Reader::open(file, &ReaderOptions::lax()).map_err(Report::new)
}

pub fn metadata(args: DumpMetadataArgs) -> Result<()> {
	let reader = open(&args.file)?;
	let metadata = reader.read_metadata().map_err(Report::new)?;
	let xml = metadata.xml_str().map_err(Report::new)?;

	match args.output {
		Some(path) => {
			fs::write(&path, xml).into_diagnostic()?;
			info!(?path, "wrote XML metadata");
		}
		None => println!("{xml}"),
	}

	Ok(())
}

pub fn subblock(args: DumpSubBlockArgs) -> Result<()> {
	let reader = open(&args.file)?;
	let subblock = reader.read_subblock(args.index).map_err(Report::new)?;
	debug!(entry = ?subblock.entry, "read sub-block");

	let stored = subblock.entry.stored_size();
	let bytes = if args.raw {
		subblock.data
	} else {
		let bitmap = subblock
			.create_bitmap(&LibConfig::new())
			.map_err(Report::new)?;
		bitmap.data().to_vec()
	};

	let mut output = File::create(&args.output).into_diagnostic()?;
	output.write_all(&bytes).into_diagnostic()?;
	info!(
		path = ?args.output,
		width = stored.w,
		height = stored.h,
		pixel_type = %subblock.entry.pixel_type(),
		"wrote sub-block pixel data"
	);
	println!(
		"{}x{} {} ({} bytes) -> {}",
		stored.w,
		stored.h,
		subblock.entry.pixel_type(),
		bytes.len(),
		args.output.display()
	);

	Ok(())
}

pub fn attachment(args: DumpAttachmentArgs) -> Result<()> {
	let reader = open(&args.file)?;
	let attachment = reader.read_attachment(args.index).map_err(Report::new)?;

	fs::write(&args.output, &attachment.data).into_diagnostic()?;
	println!(
		"{} ({}) {} bytes -> {}",
		attachment.entry.name_str(),
		attachment.entry.content_file_type_str(),
		attachment.data.len(),
		args.output.display()
	);

	Ok(())
}
