//! Zisraw: reader and writer for the CZI (ZISRAW) microscopy image container.
//!
//! A CZI file is a sequence of 32-byte-aligned segments: a fixed file header,
//! sub-block segments holding (possibly compressed) tile bitmaps addressed by
//! logical dimensions, typed attachments, one XML metadata segment, and two
//! directory segments indexing the rest. This crate parses and emits that
//! layout, keeps the directories in memory, supports in-place editing of
//! existing files, and composes tiles into bitmaps at native or reduced
//! resolution.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[doc(inline)]
pub use self::constants::*;
mod constants;

pub mod accessor;
pub mod attachment;
pub mod bitmap;
pub mod cache;
pub mod codec;
pub mod coordinate;
pub mod decode;
pub mod directory;
pub mod encode;
pub mod error;
pub mod geometry;
pub mod guid;
pub mod header;
pub mod metadata;
pub mod pixel;
pub mod rw;
pub mod segment;
pub mod stream;
pub mod subblock;
pub mod text;

pub(crate) fn map_zstd_error(code: usize) -> std::io::Error {
	let msg = zstd_safe::get_error_name(code);
	std::io::Error::other(msg)
}
