use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "zisraw", about, version)]
pub struct Args {
	/// Emit logs. Repeat for more: warn, info, debug, trace.
	#[arg(long, short = 'v', action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Write logs to a file (or a directory, for a timestamped file).
	#[arg(long)]
	pub log_file: Option<PathBuf>,

	#[command(subcommand)]
	pub action: Action,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
	Info(InfoArgs),
	DumpMetadata(DumpMetadataArgs),
	DumpSubBlock(DumpSubBlockArgs),
	DumpAttachment(DumpAttachmentArgs),
	Composite(CompositeArgs),
}

/// Print the file header, statistics, and directory listings.
#[derive(Debug, Clone, Parser)]
pub struct InfoArgs {
	/// The CZI file to inspect.
	pub file: PathBuf,

	/// Also list every sub-block directory entry.
	#[arg(long)]
	pub subblocks: bool,
}

/// Print (or save) the XML metadata.
#[derive(Debug, Clone, Parser)]
pub struct DumpMetadataArgs {
	/// The CZI file to read.
	pub file: PathBuf,

	/// Write the XML here instead of standard output.
	#[arg(long, short)]
	pub output: Option<PathBuf>,
}

/// Decode one sub-block and save its pixel data.
#[derive(Debug, Clone, Parser)]
pub struct DumpSubBlockArgs {
	/// The CZI file to read.
	pub file: PathBuf,

	/// Index of the sub-block (directory storage order).
	#[arg(long, short)]
	pub index: usize,

	/// Output file for the raw decoded pixel data.
	#[arg(long, short)]
	pub output: PathBuf,

	/// Save the raw (possibly compressed) payload without decoding.
	#[arg(long)]
	pub raw: bool,
}

/// Save one attachment's payload.
#[derive(Debug, Clone, Parser)]
pub struct DumpAttachmentArgs {
	/// The CZI file to read.
	pub file: PathBuf,

	/// Index of the attachment (directory storage order).
	#[arg(long, short)]
	pub index: usize,

	/// Output file for the payload.
	#[arg(long, short)]
	pub output: PathBuf,
}

/// Compose a tile composite and save it as raw pixels.
#[derive(Debug, Clone, Parser)]
pub struct CompositeArgs {
	/// The CZI file to read.
	pub file: PathBuf,

	/// Plane coordinate, e.g. `C0T0`.
	#[arg(long, short)]
	pub plane: String,

	/// Region of interest, `rel(x,y,w,h)` or `abs(x,y,w,h)`.
	#[arg(long, short)]
	pub roi: String,

	/// Zoom in (0, 1]; 1.0 composes layer 0 at native resolution.
	#[arg(long, short, default_value_t = 1.0)]
	pub zoom: f32,

	/// Fill the background with this gray value in [0, 1] before painting.
	#[arg(long)]
	pub background: Option<f32>,

	/// Skip sub-blocks that are fully overdrawn by later tiles.
	#[arg(long)]
	pub visibility_optimization: bool,

	/// Draw a 1-pixel black border around each tile.
	#[arg(long)]
	pub tile_border: bool,

	/// Output file for the raw composed pixel data.
	#[arg(long, short)]
	pub output: PathBuf,
}
