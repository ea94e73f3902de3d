//! The sub-block directory: wire parsing and the in-memory models.
//!
//! Three flavours exist, for the three lifecycles: a read-only directory
//! built once while opening, a writer directory that detects duplicate
//! coordinates as sub-blocks are appended, and a keyed reader-writer
//! directory that supports modification and removal.

use std::collections::{BTreeMap, BTreeSet};

use deku::DekuContainerRead;
use tracing::{debug, instrument, trace};

use crate::constants::{SIZE_SEGMENT_HEADER, SIZE_SUBBLOCK_DIRECTORY_DATA};
use crate::coordinate::{Coordinate, Dimension};
use crate::error::{Error, Result};
use crate::segment::{read_segment_header, SegmentHeader, SegmentId};
use crate::stream::{read_exact_at, ReadStream};

pub mod entry;
pub mod statistics;

pub use entry::{DimensionEntryDv, DirectoryEntryDe, DirectoryEntryDv, ParseOptions, SubBlockEntry};
pub use statistics::{
	classify_pyramid_layer, try_determine_pyramid_layer_info, BoundingBoxes, PyramidLayerInfo,
	PyramidLayerStatistics, PyramidStatistics, StatisticsUpdater, SubBlockStatistics,
};

/// Key addressing a (coordinate, M) slot, for duplicate detection.
type SlotKey = (Coordinate, Option<i32>);

fn slot_key(entry: &SubBlockEntry) -> SlotKey {
	(entry.coordinate.clone(), entry.m_index())
}

/// Parse the sub-block directory segment at `offset`, feeding each entry to
/// `add`.
///
/// Returns the segment header (the caller may care about the allocation for
/// in-place rewrites).
#[instrument(level = "debug", skip(stream, options, add))]
pub(crate) fn parse_subblock_directory<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	options: &ParseOptions,
	mut add: impl FnMut(SubBlockEntry) -> Result<()>,
) -> Result<SegmentHeader> {
	let header = read_segment_header(stream, offset, SegmentId::SubBlockDirectory)?;
	let mut data = vec![0u8; header.used_size as usize];
	read_exact_at(stream, offset + SIZE_SEGMENT_HEADER, &mut data)?;

	if data.len() < SIZE_SUBBLOCK_DIRECTORY_DATA as usize {
		return Err(Error::CorruptedData("sub-block directory segment too small".into()));
	}

	let entry_count = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
	if entry_count < 0 {
		return Err(Error::CorruptedData("negative sub-block directory entry count".into()));
	}
	debug!(%entry_count, "parsing sub-block directory");

	let mut rest = &data[SIZE_SUBBLOCK_DIRECTORY_DATA as usize..];
	for index in 0..entry_count {
		let schema = rest.get(..2).unwrap_or_default();
		let entry = if schema == b"DV" {
			let ((remaining, _), dv) =
				DirectoryEntryDv::from_bytes((rest, 0)).map_err(Error::from_deku)?;
			rest = remaining;
			SubBlockEntry::from_dv(&dv, options)?
		} else if schema == b"DE" {
			let ((remaining, _), de) =
				DirectoryEntryDe::from_bytes((rest, 0)).map_err(Error::from_deku)?;
			rest = remaining;
			SubBlockEntry::from_de(&de)
		} else {
			return Err(Error::CorruptedData(
				format!("sub-block directory entry {index} has an unknown schema").into(),
			));
		};
		trace!(%index, ?entry, "parsed directory entry");
		add(entry)?;
	}

	Ok(header)
}

/// Serialise the data part of a sub-block directory segment.
///
/// The fixed 128-byte prefix carries the entry count; entries are always
/// emitted in the `DV` schema.
pub(crate) fn subblock_directory_data_bytes<'a>(
	entries: impl ExactSizeIterator<Item = &'a SubBlockEntry>,
) -> Result<Vec<u8>> {
	use deku::DekuContainerWrite;

	let mut data = vec![0u8; SIZE_SUBBLOCK_DIRECTORY_DATA as usize];
	let count = entries.len() as i32;
	data[..4].copy_from_slice(&count.to_le_bytes());
	for entry in entries {
		data.extend(entry.to_dv().to_bytes().map_err(Error::from_deku)?);
	}

	Ok(data)
}

/// The read-only sub-block directory of an opened document.
#[derive(Debug, Default)]
pub struct SubBlockDirectory {
	entries: Vec<SubBlockEntry>,
	statistics: StatisticsUpdater,
}

impl SubBlockDirectory {
	/// Parse the directory from the segment at `offset`.
	pub fn read<S: ReadStream + ?Sized>(
		stream: &mut S,
		offset: u64,
		options: &ParseOptions,
	) -> Result<Self> {
		let mut directory = Self::default();
		parse_subblock_directory(stream, offset, options, |entry| {
			directory.statistics.update(&entry);
			directory.entries.push(entry);
			Ok(())
		})?;
		directory.statistics.consolidate();
		Ok(directory)
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the directory has no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// The entry at `index` (directory storage order).
	pub fn get(&self, index: usize) -> Option<&SubBlockEntry> {
		self.entries.get(index)
	}

	/// Iterate entries in storage order.
	pub fn iter(&self) -> impl ExactSizeIterator<Item = &SubBlockEntry> {
		self.entries.iter()
	}

	/// Aggregate statistics.
	pub fn statistics(&self) -> &SubBlockStatistics {
		self.statistics.statistics()
	}

	/// Consolidated pyramid statistics.
	pub fn pyramid_statistics(&self) -> &PyramidStatistics {
		self.statistics.pyramid_statistics()
	}
}

/// The directory a sequential writer builds while sub-blocks are appended.
///
/// Rejects duplicate (coordinate, M) slots and records the pixel type seen
/// per channel.
#[derive(Debug, Default)]
pub struct WriterSubBlockDirectory {
	entries: Vec<SubBlockEntry>,
	slots: BTreeSet<SlotKey>,
	statistics: StatisticsUpdater,
	pixel_type_for_channel: PixelTypeForChannel,
}

impl WriterSubBlockDirectory {
	/// Empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether an entry with the same (coordinate, M) slot is present.
	pub fn contains_slot(&self, entry: &SubBlockEntry) -> bool {
		self.slots.contains(&slot_key(entry))
	}

	/// Try to add an entry; returns `false` if the slot is already taken.
	pub fn try_add(&mut self, entry: SubBlockEntry) -> bool {
		if !self.slots.insert(slot_key(&entry)) {
			return false;
		}

		self.statistics.update(&entry);
		self.pixel_type_for_channel.add(&entry);
		self.entries.push(entry);
		true
	}

	/// Add an entry without the duplicate check.
	pub fn add_allowing_duplicates(&mut self, entry: SubBlockEntry) {
		self.slots.insert(slot_key(&entry));
		self.statistics.update(&entry);
		self.pixel_type_for_channel.add(&entry);
		self.entries.push(entry);
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the directory has no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Iterate entries in append order.
	pub fn iter(&self) -> impl ExactSizeIterator<Item = &SubBlockEntry> {
		self.entries.iter()
	}

	/// Aggregate statistics (not consolidated).
	pub fn statistics(&self) -> &SubBlockStatistics {
		self.statistics.statistics()
	}

	/// Pixel type per channel, as recorded from the added sub-blocks.
	pub fn pixel_type_for_channel(&self) -> &PixelTypeForChannel {
		&self.pixel_type_for_channel
	}
}

/// Pixel type per channel index, recorded while a document is written.
#[derive(Clone, Debug, Default)]
pub struct PixelTypeForChannel {
	no_channel: Option<i32>,
	per_channel: BTreeMap<i32, i32>,
}

impl PixelTypeForChannel {
	fn add(&mut self, entry: &SubBlockEntry) {
		match entry.coordinate.position(Dimension::C) {
			Some(c) => {
				self.per_channel.entry(c).or_insert(entry.pixel_type_raw);
			}
			None => {
				self.no_channel.get_or_insert(entry.pixel_type_raw);
			}
		}
	}

	/// Raw pixel type of sub-blocks without a channel index, if any were seen.
	pub fn pixel_type_for_no_channel(&self) -> Option<i32> {
		self.no_channel
	}

	/// Map from channel index to the raw pixel type first seen there.
	pub fn channel_pixel_types(&self) -> &BTreeMap<i32, i32> {
		&self.per_channel
	}
}

/// The keyed directory of the in-place reader/writer.
///
/// Entries are addressed by a stable integer key; mutation marks the
/// directory modified so the segment is rewritten on close.
#[derive(Debug, Default)]
pub struct RwSubBlockDirectory {
	entries: BTreeMap<i32, SubBlockEntry>,
	next_key: i32,
	modified: bool,
	statistics: StatisticsUpdater,
	statistics_current: bool,
}

impl RwSubBlockDirectory {
	/// Empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether a mutation happened since the directory was loaded.
	pub fn is_modified(&self) -> bool {
		self.modified
	}

	/// Set the modified flag (cleared after the segment is rewritten).
	pub fn set_modified(&mut self, modified: bool) {
		self.modified = modified;
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the directory has no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Add an entry (used while loading; does not mark modified).
	pub fn populate(&mut self, entry: SubBlockEntry) -> i32 {
		let key = self.next_key;
		self.next_key += 1;
		self.entries.insert(key, entry);
		self.statistics_current = false;
		key
	}

	/// Try to add a new entry, failing on a duplicate (coordinate, M) slot.
	pub fn try_add(&mut self, entry: SubBlockEntry) -> Option<i32> {
		if self.entries.values().any(|e| e.same_slot(&entry)) {
			return None;
		}

		let key = self.populate(entry);
		self.modified = true;
		Some(key)
	}

	/// The entry under `key`.
	pub fn get(&self, key: i32) -> Option<&SubBlockEntry> {
		self.entries.get(&key)
	}

	/// Replace the entry under `key`.
	pub fn try_modify(&mut self, key: i32, entry: SubBlockEntry) -> bool {
		match self.entries.get_mut(&key) {
			Some(slot) => {
				*slot = entry;
				self.modified = true;
				self.statistics_current = false;
				true
			}
			None => false,
		}
	}

	/// Remove the entry under `key`, returning it.
	pub fn try_remove(&mut self, key: i32) -> Option<SubBlockEntry> {
		let removed = self.entries.remove(&key)?;
		self.modified = true;
		self.statistics_current = false;
		Some(removed)
	}

	/// Iterate `(key, entry)` pairs in key order.
	pub fn iter(&self) -> impl ExactSizeIterator<Item = (i32, &SubBlockEntry)> {
		self.entries.iter().map(|(k, e)| (*k, e))
	}

	/// Iterate entries in key order.
	pub fn entries(&self) -> impl ExactSizeIterator<Item = &SubBlockEntry> {
		self.entries.values()
	}

	/// Aggregate statistics, recomputed if stale.
	pub fn statistics(&mut self) -> &SubBlockStatistics {
		self.ensure_statistics();
		self.statistics.statistics()
	}

	/// Consolidated pyramid statistics, recomputed if stale.
	pub fn pyramid_statistics(&mut self) -> &PyramidStatistics {
		self.ensure_statistics();
		self.statistics.pyramid_statistics()
	}

	fn ensure_statistics(&mut self) {
		if !self.statistics_current {
			self.statistics.clear();
			for entry in self.entries.values() {
				self.statistics.update(entry);
			}
			self.statistics.consolidate();
			self.statistics_current = true;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pixel::PixelType;
	use crate::stream::{MemoryStream, WriteStream};
	use deku::DekuContainerWrite;

	fn entry(m: i32, c: i32) -> SubBlockEntry {
		SubBlockEntry {
			coordinate: [(Dimension::C, c)].into_iter().collect(),
			m_index: m,
			x: 0,
			y: 0,
			width: 16,
			height: 16,
			stored_width: 16,
			stored_height: 16,
			pixel_type_raw: PixelType::Gray8.to_raw(),
			compression_raw: 0,
			pyramid_type_byte: 0,
			file_position: 544,
		}
	}

	fn directory_segment_bytes(entries: &[SubBlockEntry]) -> Vec<u8> {
		let data = subblock_directory_data_bytes(entries.iter()).expect("data");
		let header = SegmentHeader::new(
			SegmentId::SubBlockDirectory,
			crate::constants::align_segment_size(data.len() as u64) as i64,
			data.len() as i64,
		);
		let mut bytes = header.to_bytes().expect("header");
		bytes.extend(&data);
		bytes.resize(
			(SIZE_SEGMENT_HEADER + header.allocated_size as u64) as usize,
			0,
		);
		bytes
	}

	#[test]
	fn directory_roundtrip() {
		let entries = vec![entry(0, 0), entry(1, 0), entry(0, 1)];
		let bytes = directory_segment_bytes(&entries);

		let mut stream = MemoryStream::new();
		stream.write_at(96, &bytes).expect("write");

		let directory =
			SubBlockDirectory::read(&mut stream, 96, &ParseOptions::strict()).expect("read");
		assert_eq!(directory.len(), 3);
		assert_eq!(directory.iter().cloned().collect::<Vec<_>>(), entries);
		assert_eq!(directory.statistics().subblock_count, 3);
	}

	#[test]
	fn empty_directory_roundtrip() {
		let bytes = directory_segment_bytes(&[]);
		let mut stream = MemoryStream::with_data(bytes);
		let directory =
			SubBlockDirectory::read(&mut stream, 0, &ParseOptions::lax()).expect("read");
		assert!(directory.is_empty());
		assert!(!directory.statistics().bounding_box.is_valid());
	}

	#[test]
	fn writer_directory_rejects_duplicate_slot() {
		let mut directory = WriterSubBlockDirectory::new();
		assert!(directory.try_add(entry(0, 0)));
		assert!(!directory.try_add(entry(0, 0)));
		assert!(directory.try_add(entry(1, 0)));
		assert!(directory.try_add(entry(0, 1)));
		assert_eq!(directory.len(), 3);
	}

	#[test]
	fn writer_directory_records_channel_pixel_types() {
		let mut directory = WriterSubBlockDirectory::new();
		let mut e = entry(0, 3);
		e.pixel_type_raw = PixelType::Bgr24.to_raw();
		assert!(directory.try_add(e));
		assert_eq!(
			directory.pixel_type_for_channel().channel_pixel_types()[&3],
			PixelType::Bgr24.to_raw()
		);
	}

	#[test]
	fn rw_directory_tracks_modification() {
		let mut directory = RwSubBlockDirectory::new();
		let key = directory.populate(entry(0, 0));
		assert!(!directory.is_modified());

		assert!(directory.try_modify(key, entry(7, 0)));
		assert!(directory.is_modified());
		assert_eq!(directory.get(key).expect("entry").m_index, 7);

		assert_eq!(directory.try_remove(key).expect("removed").m_index, 7);
		assert!(directory.get(key).is_none());
		assert_eq!(directory.statistics().subblock_count, 0);
	}

	#[test]
	fn rw_directory_duplicate_add_fails() {
		let mut directory = RwSubBlockDirectory::new();
		directory.populate(entry(0, 0));
		assert!(directory.try_add(entry(0, 0)).is_none());
		assert!(directory.try_add(entry(1, 0)).is_some());
	}
}
