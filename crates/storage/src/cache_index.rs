//! Recency index over the files held by a [`DiskCache`](crate::DiskCache).
//!
//! A path is in the index only once its local copy is complete. Dropping a path
//! from the index, whether by eviction, removal or purge, deletes the local file.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

use crate::disk_cache::remove_cached;

/// Bounded LRU set of fully cached local paths.
pub struct CacheIndex {
    entries: LruCache<PathBuf, ()>,
}

impl CacheIndex {
    /// Index holding at most `capacity` files (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Whether `path` is indexed, without touching its recency.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains(path)
    }

    /// Mark `path` most recently used. Returns whether it was indexed.
    pub fn touch(&mut self, path: &Path) -> bool {
        self.entries.get(path).is_some()
    }

    /// Index `path`, evicting and deleting the least recently used file when full.
    /// Returns true if something was evicted.
    pub fn add(&mut self, path: PathBuf) -> bool {
        match self.entries.push(path.clone(), ()) {
            Some((evicted, ())) if evicted != path => {
                remove_cached(&evicted);
                true
            }
            _ => false,
        }
    }

    /// Drop `path` and delete its local copy. Returns whether it was indexed.
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.entries.pop(path) {
            Some(()) => {
                remove_cached(path);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, deleting each local copy.
    pub fn purge(&mut self) {
        while let Some((path, ())) = self.entries.pop_lru() {
            remove_cached(&path);
        }
    }
}
