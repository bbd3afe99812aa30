//! A set of archives publishing the same data, used as one.
//!
//! Existence checks and HAS reads/writes fail over across members. Bulk reads
//! are spread round robin with no failover, so a broken member surfaces its
//! error to the caller.

use std::collections::BTreeMap;

use archivist_storage::FileListing;
use parking_lot::Mutex;
use rand::Rng;
use stellar_xdr::curr::LedgerHeaderHistoryEntry;
use tracing::{info, warn};

use crate::archive::{
    Archive, ArchiveInterface, ArchiveOptions, CheckpointListing, CommandOptions, HashListing,
    Ledger,
};
use crate::archive_state::HistoryArchiveState;
use crate::checkpoint::CheckpointManager;
use crate::error::{HistoryError, Result};
use crate::hash::Hash256;
use crate::paths::{Category, DirPrefix};
use crate::stats::StatsSnapshot;
use crate::xdr_stream::XdrStream;

/// Member errors are logged once per this many failures.
const ERROR_LOG_INTERVAL: u64 = 7;

/// Failure bookkeeping for one pool member.
#[derive(Debug, Clone, Default)]
pub struct MemberErrors {
    pub count: u64,
    pub last_error: Option<String>,
}

struct Member {
    archive: Archive,
    errors: Mutex<MemberErrors>,
}

/// Round-robin pool of [`Archive`]s.
pub struct ArchivePool {
    members: Vec<Member>,
    curr: Mutex<usize>,
}

impl std::fmt::Debug for ArchivePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivePool")
            .field("members", &self.members.len())
            .field("curr", &*self.curr.lock())
            .finish()
    }
}

impl ArchivePool {
    /// Connect to every URL. Members that fail to connect are dropped; if none
    /// remain, the last connection error is returned.
    pub fn new<S: AsRef<str>>(urls: &[S], opts: &ArchiveOptions) -> Result<Self> {
        let mut archives = Vec::with_capacity(urls.len());
        let mut last_error = None;
        for url in urls {
            let url = url.as_ref();
            match Archive::connect(url, opts) {
                Ok(archive) => archives.push(archive),
                Err(e) => {
                    warn!(archive = %url, error = %e, "Error connecting to history archive");
                    last_error = Some(e);
                }
            }
        }
        if archives.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                HistoryError::EmptyPool("no archive URLs provided".to_string())
            }));
        }
        Self::from_archives(archives)
    }

    /// Build a pool over already connected archives.
    pub fn from_archives(archives: Vec<Archive>) -> Result<Self> {
        if archives.is_empty() {
            return Err(HistoryError::EmptyPool("no archives provided".to_string()));
        }
        let curr = rand::thread_rng().gen_range(0..archives.len());
        info!(members = archives.len(), "Created history archive pool");
        Ok(Self {
            members: archives
                .into_iter()
                .map(|archive| Member {
                    archive,
                    errors: Mutex::new(MemberErrors::default()),
                })
                .collect(),
            curr: Mutex::new(curr),
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn archives(&self) -> impl Iterator<Item = &Archive> {
        self.members.iter().map(|m| &m.archive)
    }

    /// Error counters, in member order.
    pub fn member_errors(&self) -> Vec<MemberErrors> {
        self.members.iter().map(|m| m.errors.lock().clone()).collect()
    }

    fn next_index(&self) -> usize {
        let mut curr = self.curr.lock();
        *curr = (*curr + 1) % self.members.len();
        *curr
    }

    /// Advance to the next member.
    pub fn get_next_archive(&self) -> &Archive {
        &self.members[self.next_index()].archive
    }

    /// Try `op` on each member in turn, starting with the next one, until one
    /// succeeds. After every member has failed, the last error is returned.
    fn run_on_each<T>(&self, op: impl Fn(&Archive) -> Result<T>) -> Result<T> {
        let start = self.next_index();
        let mut index = start;
        loop {
            let member = &self.members[index];
            match op(&member.archive) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let count = {
                        let mut errors = member.errors.lock();
                        errors.count += 1;
                        errors.last_error = Some(e.to_string());
                        errors.count
                    };
                    if count % ERROR_LOG_INTERVAL == 0 {
                        warn!(
                            archive = %member.archive.name(),
                            errors = count,
                            error = %e,
                            "History archive keeps failing"
                        );
                    }
                    index = (index + 1) % self.members.len();
                    if index == start {
                        return Err(e);
                    }
                }
            }
        }
    }
}

impl ArchiveInterface for ArchivePool {
    fn get_path_has(&self, path: &str) -> Result<HistoryArchiveState> {
        self.run_on_each(|a| a.get_path_has(path))
    }

    fn put_path_has(
        &self,
        path: &str,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()> {
        self.run_on_each(|a| a.put_path_has(path, has, opts))
    }

    fn bucket_exists(&self, bucket: &Hash256) -> Result<bool> {
        self.run_on_each(|a| a.bucket_exists(bucket))
    }

    fn bucket_size(&self, bucket: &Hash256) -> Result<u64> {
        self.get_next_archive().bucket_size(bucket)
    }

    fn category_checkpoint_exists(&self, category: Category, chk: u32) -> Result<bool> {
        self.run_on_each(|a| a.category_checkpoint_exists(category, chk))
    }

    fn get_ledger_header(&self, ledger: u32) -> Result<LedgerHeaderHistoryEntry> {
        self.get_next_archive().get_ledger_header(ledger)
    }

    fn get_root_has(&self) -> Result<HistoryArchiveState> {
        self.get_next_archive().get_root_has()
    }

    fn get_ledgers(&self, start: u32, end: u32) -> Result<BTreeMap<u32, Ledger>> {
        self.get_next_archive().get_ledgers(start, end)
    }

    fn get_latest_ledger_sequence(&self) -> Result<u32> {
        self.get_next_archive().get_latest_ledger_sequence()
    }

    fn get_checkpoint_has(&self, chk: u32) -> Result<HistoryArchiveState> {
        self.get_next_archive().get_checkpoint_has(chk)
    }

    fn put_checkpoint_has(
        &self,
        chk: u32,
        has: &HistoryArchiveState,
        opts: &CommandOptions,
    ) -> Result<()> {
        self.get_next_archive().put_checkpoint_has(chk, has, opts)
    }

    fn put_root_has(&self, has: &HistoryArchiveState, opts: &CommandOptions) -> Result<()> {
        self.get_next_archive().put_root_has(has, opts)
    }

    fn list_bucket(&self, prefix: DirPrefix) -> FileListing {
        self.get_next_archive().list_bucket(prefix)
    }

    fn list_all_buckets(&self) -> FileListing {
        self.get_next_archive().list_all_buckets()
    }

    fn list_all_bucket_hashes(&self) -> HashListing {
        self.get_next_archive().list_all_bucket_hashes()
    }

    fn list_category_checkpoints(&self, category: Category, prefix: &str) -> CheckpointListing {
        self.get_next_archive()
            .list_category_checkpoints(category, prefix)
    }

    fn get_xdr_stream_for_hash(&self, hash: &Hash256) -> Result<XdrStream> {
        self.get_next_archive().get_xdr_stream_for_hash(hash)
    }

    fn get_xdr_stream(&self, path: &str) -> Result<XdrStream> {
        self.get_next_archive().get_xdr_stream(path)
    }

    /// Members share one network, so the first member's manager speaks for all.
    fn checkpoint_manager(&self) -> CheckpointManager {
        self.members[0].archive.checkpoint_manager()
    }

    fn stats(&self) -> Vec<StatsSnapshot> {
        self.archives().flat_map(|a| a.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_storage::{MockStorage, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn member(name: &str, backend: Arc<dyn StorageBackend>) -> Archive {
        Archive::with_backend(name, backend, &ArchiveOptions::default()).unwrap()
    }

    fn root_has(ledger: u32) -> HistoryArchiveState {
        HistoryArchiveState {
            current_ledger: ledger,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let err = ArchivePool::from_archives(Vec::new()).unwrap_err();
        assert!(matches!(err, HistoryError::EmptyPool(_)));

        let urls: [&str; 0] = [];
        let err = ArchivePool::new(&urls, &ArchiveOptions::default()).unwrap_err();
        assert!(matches!(err, HistoryError::EmptyPool(_)));
    }

    #[test]
    fn test_new_returns_last_connect_error() {
        let err = ArchivePool::new(&["nope://a", "ftp://b"], &ArchiveOptions::default())
            .unwrap_err();
        assert!(matches!(err, HistoryError::Storage(_)));
    }

    #[test]
    fn test_new_drops_unreachable_members() {
        let pool = ArchivePool::new(
            &["nope://a", "mock://b", "mock://c"],
            &ArchiveOptions::default(),
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_round_robin_visits_every_member() {
        let pool = ArchivePool::new(&["mock://a", "mock://b", "mock://c"], &Default::default())
            .unwrap();
        let mut seen: Vec<String> = (0..3)
            .map(|_| pool.get_next_archive().name().to_string())
            .collect();
        seen.sort();
        assert_eq!(seen, ["mock://a", "mock://b", "mock://c"]);
    }

    #[test]
    fn test_failover_skips_broken_member() {
        let good = Arc::new(MockStorage::new());
        let pool = ArchivePool::from_archives(vec![
            member("fmock://broken", Arc::new(MockStorage::failing())),
            member("mock://good", good.clone()),
        ])
        .unwrap();
        pool.members[1]
            .archive
            .put_root_has(&root_has(127), &CommandOptions::default())
            .unwrap();

        // Whichever member goes first, failover lands on the good one.
        for _ in 0..4 {
            let has = pool.get_path_has(crate::paths::ROOT_HAS_PATH).unwrap();
            assert_eq!(has.current_ledger, 127);
        }
        let errors = pool.member_errors();
        assert!(errors[0].count >= 1);
        assert!(errors[0].last_error.is_some());
        assert_eq!(errors[1].count, 0);
    }

    #[test]
    fn test_failover_returns_last_error_when_all_fail() {
        let pool = ArchivePool::new(&["mock://a", "mock://b", "mock://c"], &Default::default())
            .unwrap();
        let err = pool.get_root_has_with_failover().unwrap_err();
        assert!(err.is_not_found());
        for errors in pool.member_errors() {
            assert_eq!(errors.count, 1);
            assert!(errors.last_error.is_some());
        }
    }

    #[test]
    fn test_failover_within_member_count() {
        let pool = ArchivePool::from_archives(vec![
            member("mock://a", Arc::new(MockStorage::new())),
            member("fmock://broken", Arc::new(MockStorage::failing())),
            member("mock://c", Arc::new(MockStorage::new())),
        ])
        .unwrap();
        for i in [0, 2] {
            pool.members[i]
                .archive
                .put_root_has(&root_has(191), &CommandOptions::default())
                .unwrap();
        }

        for _ in 0..6 {
            let attempts = AtomicUsize::new(0);
            let has = pool
                .run_on_each(|a| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    a.get_root_has()
                })
                .unwrap();
            assert_eq!(has.current_ledger, 191);
            assert!(attempts.into_inner() <= pool.len());
        }

        let errors = pool.member_errors();
        assert!(errors[1].count >= 1);
        assert_eq!(errors[0].count, 0);
        assert_eq!(errors[2].count, 0);
    }

    #[test]
    fn test_checkpoint_manager_keeps_rotation() {
        let pool = ArchivePool::new(&["mock://a", "mock://b", "mock://c"], &Default::default())
            .unwrap();
        let before = *pool.curr.lock();
        assert_eq!(pool.checkpoint_manager().frequency(), 64);
        assert_eq!(*pool.curr.lock(), before);
    }

    #[test]
    fn test_bulk_reads_do_not_fail_over() {
        let pool = ArchivePool::from_archives(vec![
            member("mock://empty", Arc::new(MockStorage::new())),
            member("mock://full", Arc::new(MockStorage::new())),
        ])
        .unwrap();
        pool.members[1]
            .archive
            .put_root_has(&root_has(63), &CommandOptions::default())
            .unwrap();

        let results: Vec<bool> = (0..4).map(|_| pool.get_root_has().is_ok()).collect();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 2);
        assert!(pool.member_errors().iter().all(|e| e.count == 0));
    }

    #[test]
    fn test_stats_concatenate_members() {
        let pool = ArchivePool::new(&["mock://a", "mock://b"], &Default::default()).unwrap();
        for _ in 0..2 {
            pool.bucket_exists(&Hash256::ZERO).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.len(), 2);
        let requests: u64 = stats.iter().map(|s| s.requests).sum();
        assert_eq!(requests, 2);
    }

    impl ArchivePool {
        fn get_root_has_with_failover(&self) -> Result<HistoryArchiveState> {
            self.run_on_each(|a| a.get_root_has())
        }
    }
}
