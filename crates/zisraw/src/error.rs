//! Error types shared by the whole crate.
//!
//! Every public operation returns [`Result`]. Parse and I/O failures
//! propagate unchanged; recoverable oddities in a file (an unrecognised
//! compression value, say) are surfaced as data, not as errors.

use std::borrow::Cow;

use miette::Diagnostic;
use thiserror::Error;

use crate::coordinate::Dimension;

/// Convenience return type.
pub type Result<T> = std::result::Result<T, Error>;

/// Combined error type for all operations on a CZI document.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
	/// The stream delivered fewer bytes than the parse required.
	#[error("not enough data at offset {offset}: requested {requested} bytes, got {got}")]
	NotEnoughData {
		/// Offset of the read in the stream.
		offset: u64,
		/// Number of bytes requested.
		requested: u64,
		/// Number of bytes actually delivered.
		got: u64,
	},

	/// The data in the file contradicts the format.
	#[error("corrupted data: {0}")]
	CorruptedData(Cow<'static, str>),

	/// A known segment magic appeared where a different one was required.
	#[error("illegal data at offset {offset}: {message}")]
	IllegalData {
		/// Offset of the offending segment.
		offset: u64,
		/// What was wrong.
		message: Cow<'static, str>,
	},

	/// An internal invariant broke after parsing.
	#[error("internal error: {0}")]
	InternalError(&'static str),

	/// The file header marks the requested segment as not present.
	#[error("segment not present: {0}")]
	SegmentNotPresent(&'static str),

	/// A plane coordinate failed validation.
	#[error(transparent)]
	#[diagnostic(transparent)]
	InvalidPlaneCoordinate(#[from] PlaneCoordinateError),

	/// A writer mutation failed.
	#[error(transparent)]
	#[diagnostic(transparent)]
	Write(#[from] WriteError),

	/// An in-place edit failed.
	#[error(transparent)]
	#[diagnostic(transparent)]
	ReaderWrite(#[from] ReaderWriteError),

	/// A stream operation failed, with positional context.
	#[error("i/o error at offset {offset} (size {size})")]
	Io {
		/// Offset of the operation.
		offset: u64,
		/// Size of the operation in bytes.
		size: u64,
		/// The underlying stream error.
		#[source]
		source: std::io::Error,
	},

	/// No sub-block was found in the channel to probe the pixel type from.
	#[error("could not determine pixel type: no sub-block in channel")]
	CouldNotDeterminePixelType,

	/// A textual form (plane coordinate, ROI, compression options) failed to parse.
	#[error("parse error in {what}: {message}")]
	StringParse {
		/// Which textual form was being parsed.
		what: &'static str,
		/// What was wrong with it.
		message: Cow<'static, str>,
	},

	/// The object has been closed and no longer operates.
	#[error("not operational: the stream has been closed")]
	NotOperational,

	/// A sub-block or attachment index does not exist in the directory.
	#[error("{what} index {index} out of range")]
	IndexOutOfRange {
		/// What kind of index.
		what: &'static str,
		/// The offending index.
		index: usize,
	},

	/// Decoding or encoding pixel data failed.
	#[error("codec error: {0}")]
	Codec(Cow<'static, str>),
}

/// Ways a plane coordinate can fail validation against a document.
#[derive(Error, Diagnostic, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneCoordinateError {
	/// A dimension present in the document's bounds was not given.
	#[error("coordinate for dimension '{0}' not given")]
	MissingDimension(Dimension),

	/// A dimension was given that does not appear in the document's bounds.
	#[error("coordinate for dimension '{0}' is not expected")]
	SurplusDimension(Dimension),

	/// A given coordinate lies outside the document's bounds.
	#[error("coordinate for dimension '{0}' is out-of-range")]
	CoordinateOutOfRange(Dimension),

	/// The S dimension is illegal in a plane coordinate.
	#[error("dimension '{0}' is illegal for a plane")]
	InvalidDimension(Dimension),
}

/// Failures of the sequential writer's mutation paths.
#[derive(Error, Diagnostic, Debug)]
pub enum WriteError {
	/// The stream accepted fewer bytes than were given.
	#[error("short write at offset {offset}: wrote {written} of {requested} bytes ({what})")]
	NotEnoughDataWritten {
		/// Offset of the write.
		offset: u64,
		/// Bytes requested.
		requested: u64,
		/// Bytes actually written.
		written: u64,
		/// Which part of the segment was being written.
		what: &'static str,
	},

	/// A payload source misbehaved (delivered more data than declared).
	#[error("payload source error: {0}")]
	GetDataCallError(Cow<'static, str>),

	/// A sub-block with this coordinate and M-index already exists.
	#[error("could not add sub-block because it already exists")]
	AddCoordinateAlreadyExisting,

	/// An attachment with this (guid, file-type, name) already exists.
	#[error("could not add attachment because it already exists")]
	AddAttachmentAlreadyExisting,

	/// A coordinate lies outside the bounds declared at creation.
	#[error("coordinate out-of-bounds")]
	SubBlockCoordinateOutOfBounds,

	/// A dimension declared in the bounds is missing from the coordinate.
	#[error("coordinate insufficient")]
	SubBlockCoordinateInsufficient,

	/// The coordinate contains a dimension not declared in the bounds.
	#[error("coordinate contains unexpected dimension")]
	AddCoordinateContainsUnexpectedDimension,

	/// A required argument was missing or out of range.
	#[error("invalid argument: {0}")]
	InvalidArgument(Cow<'static, str>),
}

/// Failures specific to the in-place reader/writer.
#[derive(Error, Diagnostic, Debug)]
pub enum ReaderWriteError {
	/// No sub-block exists under the given key.
	#[error("invalid sub-block id specified in \"{0}\"")]
	InvalidSubBlkId(&'static str),

	/// No attachment exists under the given key.
	#[error("invalid attachment id specified in \"{0}\"")]
	InvalidAttachmentId(&'static str),

	/// A sub-block with this coordinate and M-index already exists.
	#[error("could not add sub-block because it already exists")]
	AddCoordinateAlreadyExisting,

	/// An attachment with this (guid, file-type, name) already exists.
	#[error("could not add attachment because it already exists")]
	AddAttachmentAlreadyExisting,
}

impl Error {
	/// Wrap a deku parse error as [`Error::CorruptedData`].
	pub(crate) fn from_deku(orig: deku::DekuError) -> Self {
		Self::CorruptedData(orig.to_string().into())
	}
}
