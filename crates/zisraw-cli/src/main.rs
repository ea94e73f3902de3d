#![warn(clippy::unwrap_used)]
#![deny(rust_2018_idioms)]

use clap::Parser;
use miette::IntoDiagnostic;
use tracing::{debug, warn};

use crate::args::Action;

mod args;
mod composite;
mod dump;
mod info;

mod logs;

fn main() -> miette::Result<()> {
	let logs_on = logs::from_env().into_diagnostic()?;

	debug!("parsing arguments");
	let args = args::Args::parse();

	if logs_on {
		warn!("ignoring logging options from args");
	} else {
		logs::from_args(&args).into_diagnostic()?;
	}

	debug!(?args, "got arguments");

	match args.action {
		Action::Info(args) => info::info(args),
		Action::DumpMetadata(args) => dump::metadata(args),
		Action::DumpSubBlock(args) => dump::subblock(args),
		Action::DumpAttachment(args) => dump::attachment(args),
		Action::Composite(args) => composite::composite(args),
	}
}
