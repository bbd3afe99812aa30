//! Per-archive request counters.
//!
//! Counters are updated with relaxed atomics from any worker thread. Every
//! download is also a request; cache hits are neither.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live counters for one archive.
#[derive(Debug, Default)]
pub struct ArchiveStats {
    backend_name: String,
    requests: Counter,
    downloads: Counter,
    uploads: Counter,
    cache_hits: Counter,
    cache_bandwidth: Counter,
}

impl ArchiveStats {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            ..Default::default()
        }
    }

    /// A metadata request such as an existence check or listing.
    pub fn inc_requests(&self) {
        self.requests.add(1);
    }

    /// A file fetched from the backend. Counts as a request too.
    pub fn inc_downloads(&self) {
        self.downloads.add(1);
        self.requests.add(1);
    }

    pub fn inc_uploads(&self) {
        self.uploads.add(1);
    }

    /// A read served from the local cache, saving `bytes` of transfer when known.
    pub fn inc_cache_hits(&self, bytes: u64) {
        self.cache_hits.add(1);
        self.cache_bandwidth.add(bytes);
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn downloads(&self) -> u64 {
        self.downloads.get()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.get()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.get()
    }

    pub fn cache_bandwidth(&self) -> u64 {
        self.cache_bandwidth.get()
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            backend_name: self.backend_name.clone(),
            requests: self.requests(),
            downloads: self.downloads(),
            uploads: self.uploads(),
            cache_hits: self.cache_hits(),
            cache_bandwidth: self.cache_bandwidth(),
        }
    }
}

/// Point-in-time copy of [`ArchiveStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub backend_name: String,
    pub requests: u64,
    pub downloads: u64,
    pub uploads: u64,
    pub cache_hits: u64,
    pub cache_bandwidth: u64,
}
