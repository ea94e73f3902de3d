//! A size-bounded LRU cache for decoded sub-block bitmaps.
//!
//! The cache is keyed by sub-block index and safe to share between threads;
//! bitmaps are handed out as shared references. Pruning evicts the least
//! recently used entries until the configured bounds hold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::bitmap::Bitmap;

/// Bounds applied by [`SubBlockCache::prune`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachePruneOptions {
	/// Maximum total memory held by cached bitmaps, in bytes.
	pub max_memory_usage: Option<u64>,
	/// Maximum number of cached bitmaps.
	pub max_subblock_count: Option<usize>,
}

#[derive(Debug)]
struct CacheEntry {
	bitmap: Arc<Bitmap>,
	last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
	map: HashMap<usize, CacheEntry>,
	tick: u64,
}

/// A shared cache of decoded sub-block bitmaps, evicting least recently used
/// entries on [`SubBlockCache::prune`].
#[derive(Debug, Default)]
pub struct SubBlockCache {
	inner: Mutex<Inner>,
}

impl SubBlockCache {
	/// An empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// The bitmap cached for a sub-block index, marking it recently used.
	pub fn get(&self, subblock_index: usize) -> Option<Arc<Bitmap>> {
		let mut inner = self.inner.lock().ok()?;
		inner.tick += 1;
		let tick = inner.tick;
		let entry = inner.map.get_mut(&subblock_index)?;
		entry.last_used = tick;
		Some(Arc::clone(&entry.bitmap))
	}

	/// Cache a bitmap for a sub-block index, replacing any previous one.
	pub fn add(&self, subblock_index: usize, bitmap: Arc<Bitmap>) {
		if let Ok(mut inner) = self.inner.lock() {
			inner.tick += 1;
			let tick = inner.tick;
			inner.map.insert(
				subblock_index,
				CacheEntry {
					bitmap,
					last_used: tick,
				},
			);
		}
	}

	/// Number of cached bitmaps.
	pub fn len(&self) -> usize {
		self.inner.lock().map(|inner| inner.map.len()).unwrap_or(0)
	}

	/// Whether the cache is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Total memory held by cached bitmaps, in bytes.
	pub fn memory_usage(&self) -> u64 {
		self.inner
			.lock()
			.map(|inner| inner.map.values().map(|e| e.bitmap.data_size()).sum())
			.unwrap_or(0)
	}

	/// Evict least recently used entries until the bounds hold.
	pub fn prune(&self, options: &CachePruneOptions) {
		let Ok(mut inner) = self.inner.lock() else {
			return;
		};

		loop {
			let count = inner.map.len();
			let memory: u64 = inner.map.values().map(|e| e.bitmap.data_size()).sum();
			let over_count = options.max_subblock_count.is_some_and(|max| count > max);
			let over_memory = options.max_memory_usage.is_some_and(|max| memory > max);
			if !over_count && !over_memory {
				break;
			}

			let Some(oldest) = inner
				.map
				.iter()
				.min_by_key(|(_, e)| e.last_used)
				.map(|(k, _)| *k)
			else {
				break;
			};
			trace!(index = oldest, "evicting sub-block bitmap from cache");
			inner.map.remove(&oldest);
		}
	}
}
