//! A single history archive endpoint.
//!
//! [`Archive`] reads and writes the files of one archive through a
//! [`StorageBackend`], optionally fronted by a [`DiskCache`] for the large
//! immutable files (category checkpoints and buckets). HAS files and
//! existence checks always go to the backend.
//!
//! Scan state (which checkpoint files and buckets were seen, and the hashes
//! verification expects) also lives here; see the `scan` and `verify`
//! modules for the passes that fill it.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use archivist_storage::{
    connect_backend, CacheOutcome, ConnectOptions, DiskCache, FileListing, ObjectRead,
    ObjectReader, StorageBackend,
};
use parking_lot::Mutex;
use stellar_xdr::curr::{
    LedgerHeaderHistoryEntry, TransactionHistoryEntry, TransactionHistoryResultEntry,
};
use tracing::{debug, error, info};

use crate::archive_state::HistoryArchiveState;
use crate::checkpoint::CheckpointManager;
use crate::error::{HistoryError, Result};
use crate::hash::Hash256;
use crate::paths::{
    bucket_path, checkpoint_path, has_path, parse_bucket_path, parse_checkpoint_path, Category,
    DirPrefix, ROOT_HAS_PATH,
};
use crate::range::Range;
use crate::scan::ScanState;
use crate::stats::{ArchiveStats, StatsSnapshot};
use crate::xdr_stream::XdrStream;

/// Default number of parallel workers for bulk commands.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// Lazily listed bucket hashes.
pub type HashListing = Box<dyn Iterator<Item = Result<Hash256>> + Send>;

/// Lazily listed checkpoint numbers.
pub type CheckpointListing = Box<dyn Iterator<Item = Result<u32>> + Send>;

/// How to reach an archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub connect: ConnectOptions,
    /// Expected network. Checked against every HAS read when both sides set one.
    pub network_passphrase: Option<String>,
    /// Ledgers per checkpoint; 0 selects the default of 64.
    pub checkpoint_frequency: u32,
    /// Directory for the on-disk cache of checkpoint and bucket files.
    pub cache_path: Option<PathBuf>,
    /// Maximum number of cached files; 0 selects the cache default.
    pub cache_max_files: usize,
}

/// Knobs shared by the scan, repair and mirror commands.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub concurrency: usize,
    pub range: Range,
    pub dry_run: bool,
    pub force: bool,
    pub verify: bool,
    pub thorough: bool,
    pub skip_optional: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            range: Range::new(0, u32::MAX),
            dry_run: false,
            force: false,
            verify: false,
            thorough: false,
            skip_optional: false,
        }
    }
}

/// Everything an archive publishes about one ledger.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub header: Option<LedgerHeaderHistoryEntry>,
    pub transaction: Option<TransactionHistoryEntry>,
    pub transaction_result: Option<TransactionHistoryResultEntry>,
}

/// Read/write surface shared by a single [`Archive`] and an
/// [`ArchivePool`](crate::pool::ArchivePool).
pub trait ArchiveInterface: Send + Sync {
    fn get_path_has(&self, path: &str) -> Result<HistoryArchiveState>;
    fn put_path_has(
        &self,
        path: &str,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()>;
    fn bucket_exists(&self, bucket: &Hash256) -> Result<bool>;
    fn bucket_size(&self, bucket: &Hash256) -> Result<u64>;
    fn category_checkpoint_exists(&self, category: Category, chk: u32) -> Result<bool>;
    /// Header of `ledger`, read from the checkpoint that contains it.
    fn get_ledger_header(&self, ledger: u32) -> Result<LedgerHeaderHistoryEntry>;
    fn get_root_has(&self) -> Result<HistoryArchiveState>;
    /// Every ledger in the checkpoints covering `[start, end]`.
    ///
    /// The result is checkpoint-aligned and may hold ledgers outside the
    /// requested bounds.
    fn get_ledgers(&self, start: u32, end: u32) -> Result<BTreeMap<u32, Ledger>>;
    fn get_latest_ledger_sequence(&self) -> Result<u32>;
    fn get_checkpoint_has(&self, chk: u32) -> Result<HistoryArchiveState>;
    fn put_checkpoint_has(
        &self,
        chk: u32,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()>;
    /// Overwrite the root HAS regardless of `opts.force`.
    fn put_root_has(&self, has: &HistoryArchiveState, opts: &CommandOptions) -> Result<()>;
    fn list_bucket(&self, prefix: DirPrefix) -> FileListing;
    fn list_all_buckets(&self) -> FileListing;
    fn list_all_bucket_hashes(&self) -> HashListing;
    /// Checkpoints with a `category` file under `prefix` (`xx/yy/zz`, or empty for all).
    fn list_category_checkpoints(&self, category: Category, prefix: &str) -> CheckpointListing;
    fn get_xdr_stream_for_hash(&self, hash: &Hash256) -> Result<XdrStream>;
    fn get_xdr_stream(&self, path: &str) -> Result<XdrStream>;
    fn checkpoint_manager(&self) -> CheckpointManager;
    fn stats(&self) -> Vec<StatsSnapshot>;
}

/// One archive endpoint.
pub struct Archive {
    name: String,
    network_passphrase: Option<String>,
    checkpoint_manager: CheckpointManager,
    backend: Arc<dyn StorageBackend>,
    cache: Option<DiskCache>,
    stats: ArchiveStats,
    pub(crate) scan: Mutex<ScanState>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("cache", &self.cache.as_ref().map(|c| c.dir().to_path_buf()))
            .finish()
    }
}

impl Archive {
    /// Connect to the archive at `url`.
    pub fn connect(url: &str, opts: &ArchiveOptions) -> Result<Self> {
        let backend = connect_backend(url, &opts.connect)?;
        Self::with_backend(url, backend, opts)
    }

    /// Wrap an already constructed backend. `name` identifies it in logs and stats.
    pub fn with_backend(
        name: &str,
        backend: Arc<dyn StorageBackend>,
        opts: &ArchiveOptions,
    ) -> Result<Self> {
        let cache = match &opts.cache_path {
            Some(dir) => Some(DiskCache::new(
                backend.clone(),
                dir.clone(),
                opts.cache_max_files,
            )?),
            None => None,
        };
        debug!(archive = %name, cached = cache.is_some(), "Connected to history archive");

        Ok(Self {
            name: name.to_string(),
            network_passphrase: opts
                .network_passphrase
                .clone()
                .filter(|p| !p.is_empty()),
            checkpoint_manager: CheckpointManager::new(opts.checkpoint_frequency),
            backend,
            cache,
            stats: ArchiveStats::new(name),
            scan: Mutex::new(ScanState::default()),
        })
    }

    /// The URL or name this archive was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The uncached backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The disk cache, if one is configured.
    pub fn cache(&self) -> Option<&DiskCache> {
        self.cache.as_ref()
    }

    pub(crate) fn live_stats(&self) -> &ArchiveStats {
        &self.stats
    }

    /// Release the cache index and the backend.
    pub fn close(&self) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.close()?,
            None => self.backend.close()?,
        }
        Ok(())
    }

    /// Read `path` through the cache when there is one.
    fn cached_get(&self, path: &str) -> Result<ObjectReader> {
        let Some(cache) = &self.cache else {
            self.stats.inc_downloads();
            return Ok(self.backend.get_file(path)?);
        };

        match cache.get_file_tracked(path) {
            Ok((reader, CacheOutcome::Hit)) => {
                let saved = cache.size(path).unwrap_or(0);
                self.stats.inc_cache_hits(saved);
                Ok(reader)
            }
            Ok((reader, _)) => {
                self.stats.inc_downloads();
                Ok(reader)
            }
            Err(e) => {
                self.stats.inc_downloads();
                Err(e.into())
            }
        }
    }

    fn cached_exists(&self, path: &str) -> Result<bool> {
        if let Some(cache) = &self.cache {
            if cache.is_cached(path) {
                return Ok(true);
            }
        }
        self.stats.inc_requests();
        Ok(self.backend.exists(path)?)
    }

    /// Decode one category file of `chk` into `ledgers`, keyed by each record's own sequence.
    fn fetch_category(
        &self,
        ledgers: &mut BTreeMap<u32, Ledger>,
        category: Category,
        chk: u32,
    ) -> Result<()> {
        let mut stream = self.get_xdr_stream(&checkpoint_path(category, chk))?;
        match category {
            Category::Ledger => {
                while let Some(entry) = stream.read_one::<LedgerHeaderHistoryEntry>()? {
                    let seq = entry.header.ledger_seq;
                    ledgers.entry(seq).or_default().header = Some(entry);
                }
            }
            Category::Transactions => {
                while let Some(entry) = stream.read_one::<TransactionHistoryEntry>()? {
                    let seq = entry.ledger_seq;
                    ledgers.entry(seq).or_default().transaction = Some(entry);
                }
            }
            Category::Results => {
                while let Some(entry) = stream.read_one::<TransactionHistoryResultEntry>()? {
                    let seq = entry.ledger_seq;
                    ledgers.entry(seq).or_default().transaction_result = Some(entry);
                }
            }
            other => {
                return Err(HistoryError::InvalidPath(format!(
                    "{other} files do not hold ledger records"
                )))
            }
        }
        stream.close()
    }
}

impl ArchiveInterface for Archive {
    fn get_path_has(&self, path: &str) -> Result<HistoryArchiveState> {
        // A query on archive state, not a data download.
        self.stats.inc_requests();
        let mut reader = self.backend.get_file(path)?;
        let mut json = String::new();
        let read = reader.read_to_string(&mut json);
        reader.close()?;
        read?;

        let has = HistoryArchiveState::from_json(&json)?;
        if let (Some(expected), Some(actual)) =
            (&self.network_passphrase, has.network_passphrase())
        {
            if !actual.is_empty() && expected != actual {
                return Err(HistoryError::NetworkPassphraseMismatch {
                    expected: expected.clone(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(has)
    }

    fn put_path_has(
        &self,
        path: &str,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()> {
        let exists = self.backend.exists(path);
        self.stats.inc_requests();
        if exists? && !opts.force {
            info!(path = %path, "Skipping existing file");
            return Ok(());
        }
        let json = has.to_json()?;
        self.stats.inc_uploads();
        self.backend.put_file(path, &mut json.as_bytes())?;
        Ok(())
    }

    fn bucket_exists(&self, bucket: &Hash256) -> Result<bool> {
        self.cached_exists(&bucket_path(bucket))
    }

    fn bucket_size(&self, bucket: &Hash256) -> Result<u64> {
        self.stats.inc_requests();
        Ok(self.backend.size(&bucket_path(bucket))?)
    }

    fn category_checkpoint_exists(&self, category: Category, chk: u32) -> Result<bool> {
        self.stats.inc_requests();
        Ok(self.backend.exists(&checkpoint_path(category, chk))?)
    }

    fn get_ledger_header(&self, ledger: u32) -> Result<LedgerHeaderHistoryEntry> {
        let chk = self.checkpoint_manager.get_checkpoint(ledger);
        let mut stream = self.get_xdr_stream(&checkpoint_path(Category::Ledger, chk))?;
        while let Some(entry) = stream.read_one::<LedgerHeaderHistoryEntry>()? {
            if entry.header.ledger_seq == ledger {
                stream.close()?;
                return Ok(entry);
            }
        }
        stream.close()?;
        Err(HistoryError::LedgerNotFound(ledger))
    }

    fn get_root_has(&self) -> Result<HistoryArchiveState> {
        self.get_path_has(ROOT_HAS_PATH)
    }

    fn get_ledgers(&self, start: u32, end: u32) -> Result<BTreeMap<u32, Ledger>> {
        if start > end {
            return Err(HistoryError::InvalidRange { start, end });
        }
        let mgr = self.checkpoint_manager;
        let covering = Range::new(mgr.get_checkpoint(start), mgr.get_checkpoint(end));

        let mut ledgers = BTreeMap::new();
        for chk in covering.checkpoints(&mgr) {
            for category in [Category::Ledger, Category::Transactions, Category::Results] {
                if !self.category_checkpoint_exists(category, chk)? {
                    return Err(HistoryError::UnpublishedCheckpoint(chk));
                }
                self.fetch_category(&mut ledgers, category, chk)?;
            }
        }
        Ok(ledgers)
    }

    fn get_latest_ledger_sequence(&self) -> Result<u32> {
        match self.get_root_has() {
            Ok(has) => Ok(has.current_ledger),
            Err(e) => {
                error!(archive = %self.name, error = %e, "Error getting root HAS from archive");
                Err(e)
            }
        }
    }

    fn get_checkpoint_has(&self, chk: u32) -> Result<HistoryArchiveState> {
        self.get_path_has(&has_path(chk))
    }

    fn put_checkpoint_has(
        &self,
        chk: u32,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()> {
        self.put_path_has(&has_path(chk), has, opts)
    }

    fn put_root_has(&self, has: &HistoryArchiveState, opts: &CommandOptions) -> Result<()> {
        let forced = CommandOptions {
            force: true,
            ..opts.clone()
        };
        self.put_path_has(ROOT_HAS_PATH, has, &forced)
    }

    fn list_bucket(&self, prefix: DirPrefix) -> FileListing {
        self.stats.inc_requests();
        self.backend.list_files(&format!("bucket/{}", prefix.path()))
    }

    fn list_all_buckets(&self) -> FileListing {
        self.stats.inc_requests();
        self.backend.list_files("bucket")
    }

    fn list_all_bucket_hashes(&self) -> HashListing {
        Box::new(self.list_all_buckets().filter_map(|item| match item {
            Ok(path) => parse_bucket_path(&path).map(Ok),
            Err(e) => Some(Err(e.into())),
        }))
    }

    fn list_category_checkpoints(&self, category: Category, prefix: &str) -> CheckpointListing {
        self.stats.inc_requests();
        let dir = if prefix.is_empty() {
            category.as_str().to_string()
        } else {
            format!("{category}/{}", prefix.trim_matches('/'))
        };
        Box::new(
            self.backend
                .list_files(&dir)
                .filter_map(move |item| match item {
                    Ok(path) => parse_checkpoint_path(category, &path).map(Ok),
                    Err(e) => Some(Err(e.into())),
                }),
        )
    }

    fn get_xdr_stream_for_hash(&self, hash: &Hash256) -> Result<XdrStream> {
        self.get_xdr_stream(&bucket_path(hash))
    }

    fn get_xdr_stream(&self, path: &str) -> Result<XdrStream> {
        if !path.ends_with(".xdr.gz") {
            return Err(HistoryError::InvalidPath(path.to_string()));
        }
        let reader = self.cached_get(path)?;
        Ok(XdrStream::gzip(reader, path))
    }

    fn checkpoint_manager(&self) -> CheckpointManager {
        self.checkpoint_manager
    }

    fn stats(&self) -> Vec<StatsSnapshot> {
        vec![self.stats.snapshot()]
    }
}
