//! The read-side façade: open a stream, hold the directories, serve reads.
//!
//! The reader is safe for concurrent read-only use provided the underlying
//! stream tolerates interleaved positional reads; access is serialised under
//! an internal mutex. `close` swaps the stream handle out atomically, so
//! in-flight reads finish on their own reference while later calls fail with
//! [`Error::NotOperational`].

use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use crate::attachment::{read_attachment_segment, Attachment, AttachmentDirectory, AttachmentEntry};
use crate::coordinate::{Coordinate, Dimension};
use crate::directory::{
	ParseOptions, PyramidStatistics, SubBlockDirectory, SubBlockEntry, SubBlockStatistics,
};
use crate::error::{Error, Result};
use crate::geometry::IntRect;
use crate::header::{read_file_header, FileHeaderSegmentData};
use crate::metadata::{read_metadata_segment, MetadataSegment};
use crate::stream::ReadStream;
use crate::subblock::{read_subblock_segment, SubBlock};

/// Options for [`Reader::open`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ReaderOptions {
	/// Checks applied while parsing the sub-block directory.
	pub parse_options: ParseOptions,
	/// Require the entry embedded in each sub-block segment to agree with
	/// its directory entry.
	pub strict_subblock_agreement: bool,
}

impl ReaderOptions {
	/// Lax everything; the default.
	pub fn lax() -> Self {
		Self::default()
	}

	/// Strict directory parsing and sub-block agreement checks.
	pub fn strict() -> Self {
		Self {
			parse_options: ParseOptions::strict(),
			strict_subblock_agreement: true,
		}
	}
}

/// Whether `entry` matches the plane filter.
///
/// Only the dimensions present in the filter constrain the entry; absent
/// dimensions are wildcards (which is what permits omitting size-1
/// dimensions from a plane coordinate).
pub(crate) fn coordinate_matches(plane: &Coordinate, entry: &Coordinate) -> bool {
	plane
		.iter()
		.all(|(dimension, position)| entry.position(dimension) == Some(position))
}

/// Read access to the sub-blocks of an open document.
///
/// [`Reader`] implements this; tests and tools can wrap it to observe or
/// redirect reads.
pub trait SubBlockRepository {
	/// Enumerate all sub-blocks in directory storage order. The callback
	/// returns `false` to stop.
	fn enumerate_subblocks(&self, func: &mut dyn FnMut(usize, &SubBlockEntry) -> bool);

	/// The directory entry at `index`, without touching the stream.
	fn try_get_subblock_info(&self, index: usize) -> Option<SubBlockEntry>;

	/// Read and parse the sub-block segment for `index`.
	fn read_subblock(&self, index: usize) -> Result<SubBlock>;

	/// Aggregate statistics over the directory.
	fn statistics(&self) -> SubBlockStatistics;

	/// Consolidated pyramid statistics.
	fn pyramid_statistics(&self) -> PyramidStatistics;

	/// Enumerate sub-blocks matching a plane filter and intersecting a ROI,
	/// optionally restricted to layer 0 (stored == logical).
	fn enum_subset(
		&self,
		plane: Option<&Coordinate>,
		roi: Option<&IntRect>,
		only_layer0: bool,
		func: &mut dyn FnMut(usize, &SubBlockEntry) -> bool,
	) {
		self.enumerate_subblocks(&mut |index, entry| {
			if only_layer0 && !entry.is_stored_size_equal_logical_size() {
				return true;
			}
			if let Some(plane) = plane {
				if !coordinate_matches(plane, &entry.coordinate) {
					return true;
				}
			}
			if let Some(roi) = roi {
				if !roi.intersects(&entry.logical_rect()) {
					return true;
				}
			}

			func(index, entry)
		});
	}

	/// Some sub-block in the given channel, used to probe the pixel type.
	///
	/// When the document declares no C dimension at all, the channel index
	/// is ignored and any sub-block qualifies.
	fn subblock_info_of_arbitrary_subblock_in_channel(
		&self,
		channel: i32,
	) -> Option<SubBlockEntry> {
		let has_channels = self.statistics().dim_bounds.is_valid(Dimension::C);
		let mut found = None;
		self.enumerate_subblocks(&mut |_, entry| {
			if !has_channels || entry.coordinate.position(Dimension::C) == Some(channel) {
				found = Some(entry.clone());
				false
			} else {
				true
			}
		});
		found
	}
}

/// A CZI document opened for reading.
pub struct Reader<S> {
	stream: Mutex<Option<Arc<Mutex<S>>>>,
	header: FileHeaderSegmentData,
	subblocks: SubBlockDirectory,
	attachments: AttachmentDirectory,
	strict_subblock_agreement: bool,
}

impl<S: ReadStream> Reader<S> {
	/// Open a document: parse the file header and both directories.
	///
	/// The metadata segment is loaded lazily, on request.
	#[instrument(level = "debug", skip(stream, options))]
	pub fn open(mut stream: S, options: &ReaderOptions) -> Result<Self> {
		let header = read_file_header(&mut stream)?;

		let subblocks = match header.subblock_directory() {
			Some(position) => {
				SubBlockDirectory::read(&mut stream, position, &options.parse_options)?
			}
			None => SubBlockDirectory::default(),
		};

		let attachments = match header.attachment_directory() {
			Some(position) => AttachmentDirectory::read(&mut stream, position)?,
			None => AttachmentDirectory::default(),
		};

		debug!(
			subblocks = subblocks.len(),
			attachments = attachments.len(),
			"opened CZI document"
		);
		Ok(Self {
			stream: Mutex::new(Some(Arc::new(Mutex::new(stream)))),
			header,
			subblocks,
			attachments,
			strict_subblock_agreement: options.strict_subblock_agreement,
		})
	}

	/// The parsed file header.
	pub fn file_header(&self) -> &FileHeaderSegmentData {
		&self.header
	}

	/// Number of sub-blocks in the directory.
	pub fn subblock_count(&self) -> usize {
		self.subblocks.len()
	}

	/// Number of attachments in the directory.
	pub fn attachment_count(&self) -> usize {
		self.attachments.len()
	}

	/// Take a reference to the stream, failing after [`Reader::close`].
	fn stream_handle(&self) -> Result<Arc<Mutex<S>>> {
		let guard = self
			.stream
			.lock()
			.map_err(|_| Error::InternalError("reader stream mutex poisoned"))?;
		guard.as_ref().cloned().ok_or(Error::NotOperational)
	}

	/// Read the metadata segment.
	pub fn read_metadata(&self) -> Result<MetadataSegment> {
		let position = self
			.header
			.metadata()
			.ok_or(Error::SegmentNotPresent("metadata"))?;
		let handle = self.stream_handle()?;
		let mut stream = handle
			.lock()
			.map_err(|_| Error::InternalError("reader stream mutex poisoned"))?;
		read_metadata_segment(&mut *stream, position)
	}

	/// The attachment directory entry at `index`.
	pub fn try_get_attachment_info(&self, index: usize) -> Option<AttachmentEntry> {
		self.attachments.get(index).cloned()
	}

	/// Enumerate attachments in directory storage order.
	pub fn enumerate_attachments(&self, func: &mut dyn FnMut(usize, &AttachmentEntry) -> bool) {
		for (index, entry) in self.attachments.iter().enumerate() {
			if !func(index, entry) {
				break;
			}
		}
	}

	/// Enumerate attachments filtered by content file type and/or name.
	pub fn enumerate_attachments_filtered(
		&self,
		content_file_type: Option<&str>,
		name: Option<&str>,
		func: &mut dyn FnMut(usize, &AttachmentEntry) -> bool,
	) {
		self.enumerate_attachments(&mut |index, entry| {
			if let Some(want) = content_file_type {
				if entry.content_file_type_str() != want {
					return true;
				}
			}
			if let Some(want) = name {
				if entry.name_str() != want {
					return true;
				}
			}

			func(index, entry)
		});
	}

	/// Read the attachment segment for `index`.
	pub fn read_attachment(&self, index: usize) -> Result<Attachment> {
		let entry = self
			.attachments
			.get(index)
			.ok_or(Error::IndexOutOfRange {
				what: "attachment",
				index,
			})?;
		let handle = self.stream_handle()?;
		let mut stream = handle
			.lock()
			.map_err(|_| Error::InternalError("reader stream mutex poisoned"))?;
		read_attachment_segment(&mut *stream, entry.file_position)
	}

	/// Drop the stream. Subsequent reads fail with [`Error::NotOperational`];
	/// in-flight reads complete on their own reference. Idempotent.
	pub fn close(&self) {
		if let Ok(mut guard) = self.stream.lock() {
			guard.take();
		}
	}
}

impl<S: ReadStream> SubBlockRepository for Reader<S> {
	fn enumerate_subblocks(&self, func: &mut dyn FnMut(usize, &SubBlockEntry) -> bool) {
		for (index, entry) in self.subblocks.iter().enumerate() {
			if !func(index, entry) {
				break;
			}
		}
	}

	fn try_get_subblock_info(&self, index: usize) -> Option<SubBlockEntry> {
		self.subblocks.get(index).cloned()
	}

	fn read_subblock(&self, index: usize) -> Result<SubBlock> {
		let entry = self.subblocks.get(index).ok_or(Error::IndexOutOfRange {
			what: "sub-block",
			index,
		})?;
		let handle = self.stream_handle()?;
		let mut stream = handle
			.lock()
			.map_err(|_| Error::InternalError("reader stream mutex poisoned"))?;
		read_subblock_segment(
			&mut *stream,
			entry.file_position,
			Some(entry),
			self.strict_subblock_agreement,
		)
	}

	fn statistics(&self) -> SubBlockStatistics {
		self.subblocks.statistics().clone()
	}

	fn pyramid_statistics(&self) -> PyramidStatistics {
		self.subblocks.pyramid_statistics().clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plane_filter_constrains_only_its_own_dimensions() {
		let plane: Coordinate = [(Dimension::C, 1)].into_iter().collect();
		let entry: Coordinate = [(Dimension::C, 1), (Dimension::T, 0)].into_iter().collect();
		assert!(coordinate_matches(&plane, &entry));

		let other: Coordinate = [(Dimension::C, 2), (Dimension::T, 0)].into_iter().collect();
		assert!(!coordinate_matches(&plane, &other));

		let missing: Coordinate = [(Dimension::T, 0)].into_iter().collect();
		assert!(!coordinate_matches(&plane, &missing));
	}
}
