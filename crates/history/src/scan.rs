//! Scanning an archive for published checkpoint files and buckets.
//!
//! A scan records what the archive holds into the [`Archive`]'s scan state.
//! Checkpoint files are found by listing shard directories when the backend
//! can list, and by one existence check per file otherwise. Buckets are
//! collected twice over: every bucket file present, and every bucket some
//! scanned `history` HAS refers to. The difference between the two is what
//! is missing.
//!
//! Scans never stop at the first failure. Each failed item is logged and
//! counted, and the pass reports the total at the end.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::info;

use crate::archive::{Archive, ArchiveInterface, CommandOptions};
use crate::error::{HistoryError, Result};
use crate::hash::Hash256;
use crate::parallel::{for_each_parallel, note_error};
use crate::paths::Category;
use crate::range::{fmt_range_list, Range};

/// What a scan has found so far, plus the hashes verification expects.
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    /// Checkpoints seen per category. Only present files are recorded.
    pub checkpoint_files: BTreeMap<Category, BTreeSet<u32>>,
    pub all_buckets: BTreeSet<Hash256>,
    pub referenced_buckets: BTreeSet<Hash256>,

    pub expect_ledger_hashes: HashMap<u32, Hash256>,
    pub actual_ledger_hashes: HashMap<u32, Hash256>,
    pub expect_tx_set_hashes: HashMap<u32, Hash256>,
    pub actual_tx_set_hashes: HashMap<u32, Hash256>,
    pub expect_tx_result_set_hashes: HashMap<u32, Hash256>,
    pub actual_tx_result_set_hashes: HashMap<u32, Hash256>,

    pub invalid_buckets: u32,
    pub invalid_ledgers: u32,
    pub invalid_tx_sets: u32,
    pub invalid_tx_result_sets: u32,
}

fn aggregate(count: u32, operation: &'static str) -> Result<()> {
    if count == 0 {
        Ok(())
    } else {
        Err(HistoryError::Aggregate { count, operation })
    }
}

impl Archive {
    /// Scan checkpoint files in `opts.range`, clamped to what the root HAS
    /// says is published. Returns the range actually scanned.
    pub fn scan_checkpoints(&self, opts: &CommandOptions) -> Result<Range> {
        let root = self.get_root_has()?;
        let mgr = self.checkpoint_manager();
        let range = opts.range.clamp(&root.range(&mgr), &mgr);

        info!(archive = %self.name(), range = %range, "Scanning checkpoint files");
        if self.backend().can_list_files() {
            self.scan_checkpoints_fast(opts, &range)?;
        } else {
            self.scan_checkpoints_slow(opts, &range)?;
        }
        Ok(range)
    }

    /// Find checkpoint files by listing every shard directory `range` touches.
    pub fn scan_checkpoints_fast(&self, opts: &CommandOptions, range: &Range) -> Result<()> {
        let mgr = self.checkpoint_manager();
        let prefixes = range.dir_prefixes(&mgr);
        let requests = Category::ALL
            .into_iter()
            .flat_map(|cat| prefixes.iter().map(move |dp| (cat, dp.path())));

        let errors = for_each_parallel(opts.concurrency, requests, |(cat, prefix)| {
            let mut errors = 0;
            for item in self.list_category_checkpoints(cat, &prefix) {
                match item {
                    Ok(chk) if range.in_range(chk) => {
                        self.note_checkpoint_file(cat, chk, true);
                        if opts.verify {
                            errors += note_error(self.verify_category_checkpoint(cat, chk));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => errors += note_error::<()>(Err(e)),
                }
            }
            errors
        })?;

        info!(errors, "Checkpoint files scanned");
        self.report_checkpoint_stats();
        aggregate(errors, "scanning checkpoints")
    }

    /// Find checkpoint files with one existence check per (category, checkpoint).
    pub fn scan_checkpoints_slow(&self, opts: &CommandOptions, range: &Range) -> Result<()> {
        let mgr = self.checkpoint_manager();
        let requests = Category::ALL
            .into_iter()
            .flat_map(|cat| range.checkpoints(&mgr).map(move |chk| (cat, chk)));

        let errors = for_each_parallel(opts.concurrency, requests, |(cat, chk)| {
            match self.category_checkpoint_exists(cat, chk) {
                Ok(exists) => {
                    self.note_checkpoint_file(cat, chk, exists);
                    if exists && opts.verify {
                        note_error(self.verify_category_checkpoint(cat, chk))
                    } else {
                        0
                    }
                }
                Err(e) => note_error::<()>(Err(e)),
            }
        })?;

        info!(errors, "Checkpoint files scanned");
        self.report_checkpoint_stats();
        aggregate(errors, "scanning checkpoints")
    }

    /// Scan checkpoint files, then buckets. Both passes always run; the
    /// first error is returned.
    pub fn scan(&self, opts: &CommandOptions) -> Result<Range> {
        let checkpoints = self.scan_checkpoints(opts);
        let buckets = self.scan_buckets(opts);
        let range = checkpoints?;
        buckets?;
        Ok(range)
    }

    /// Record every bucket file the archive lists.
    pub fn scan_all_buckets(&self) -> Result<()> {
        info!(archive = %self.name(), "Scanning all buckets, and those referenced by range");
        let mut errors = 0;
        for item in self.list_all_bucket_hashes() {
            match item {
                Ok(hash) => self.note_existing_bucket(hash),
                Err(e) => errors += note_error::<()>(Err(e)),
            }
        }
        aggregate(errors, "scanning all buckets")
    }

    /// Collect buckets referenced by every scanned `history` file, checking
    /// (and with `opts.verify`, verifying) each newly referenced one.
    pub fn scan_buckets(&self, opts: &CommandOptions) -> Result<()> {
        if opts.concurrency == 0 {
            return Err(HistoryError::ZeroConcurrency);
        }

        // Listing everything up front beats one existence check per bucket.
        let do_list = self.backend().can_list_files();
        let mut errors = 0;
        if do_list {
            errors += note_error(self.scan_all_buckets());
        }

        let histories = self.scanned_checkpoints(Category::History);
        errors += for_each_parallel(opts.concurrency, histories, |chk| {
            let has = match self.get_checkpoint_has(chk) {
                Ok(has) => has,
                Err(e) => return note_error::<()>(Err(e)),
            };
            let mut errors = 0;
            for bucket in has.buckets() {
                if !self.note_referenced_bucket(bucket) {
                    continue;
                }
                if do_list && !opts.verify {
                    continue;
                }
                match self.bucket_exists(&bucket) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        errors += note_error::<()>(Err(e));
                        continue;
                    }
                }
                if !do_list {
                    self.note_existing_bucket(bucket);
                }
                if opts.verify {
                    let verified = if opts.thorough {
                        self.verify_bucket_entries(&bucket)
                    } else {
                        self.verify_bucket_hash(&bucket)
                    };
                    let failed = note_error(verified);
                    if failed != 0 {
                        self.scan.lock().invalid_buckets += 1;
                    }
                    errors += failed;
                }
            }
            errors
        })?;

        self.report_bucket_stats();
        aggregate(errors, "scanning buckets")
    }

    /// Forget every scanned checkpoint file and bucket.
    pub fn clear_cached_info(&self) {
        let mut state = self.scan.lock();
        state.checkpoint_files.clear();
        state.all_buckets.clear();
        state.referenced_buckets.clear();
    }

    /// Record whether `category` has a file for `chk`.
    pub fn note_checkpoint_file(&self, category: Category, chk: u32, present: bool) {
        let mut state = self.scan.lock();
        let files = state.checkpoint_files.entry(category).or_default();
        if present {
            files.insert(chk);
        } else {
            files.remove(&chk);
        }
    }

    pub fn note_existing_bucket(&self, bucket: Hash256) {
        self.scan.lock().all_buckets.insert(bucket);
    }

    /// Record a bucket reference. Returns `true` the first time `bucket` is seen.
    pub fn note_referenced_bucket(&self, bucket: Hash256) -> bool {
        self.scan.lock().referenced_buckets.insert(bucket)
    }

    /// Checkpoints in `range` with no scanned file, per category.
    pub fn check_checkpoint_files_missing(&self, range: &Range) -> BTreeMap<Category, Vec<u32>> {
        let mgr = self.checkpoint_manager();
        let state = self.scan.lock();
        Category::ALL
            .into_iter()
            .map(|cat| {
                let found = state.checkpoint_files.get(&cat);
                let missing = range
                    .checkpoints(&mgr)
                    .filter(|chk| !found.is_some_and(|set| set.contains(chk)))
                    .collect();
                (cat, missing)
            })
            .collect()
    }

    /// Buckets referenced by a scanned HAS but not present in the archive.
    pub fn check_buckets_missing(&self) -> BTreeSet<Hash256> {
        let state = self.scan.lock();
        state
            .referenced_buckets
            .difference(&state.all_buckets)
            .copied()
            .collect()
    }

    /// Checkpoints with a scanned `category` file, ascending.
    pub fn scanned_checkpoints(&self, category: Category) -> Vec<u32> {
        self.scan
            .lock()
            .checkpoint_files
            .get(&category)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn referenced_buckets(&self) -> BTreeSet<Hash256> {
        self.scan.lock().referenced_buckets.clone()
    }

    /// Log gaps found by the last scan of `range` and return how many files
    /// are missing. Optional categories count unless `opts.skip_optional`.
    pub fn report_missing(&self, range: &Range, opts: &CommandOptions) -> usize {
        let mgr = self.checkpoint_manager();
        info!("Examining checkpoint files for gaps");
        let missing_files = self.check_checkpoint_files_missing(range);
        info!("Examining buckets referenced by checkpoints");
        let missing_buckets = self.check_buckets_missing();

        let mut total = 0;
        for (cat, missing) in &missing_files {
            if missing.is_empty() || (!cat.is_required() && opts.skip_optional) {
                continue;
            }
            total += missing.len();
            info!(
                category = %cat,
                count = missing.len(),
                checkpoints = %fmt_range_list(missing, &mgr),
                "Missing checkpoint files"
            );
        }
        if total == 0 {
            info!(range = %range, "No checkpoint files missing in range");
        }

        for bucket in &missing_buckets {
            info!(bucket = %bucket, "Missing bucket");
        }
        if missing_buckets.is_empty() {
            info!(range = %range, "No missing buckets referenced in range");
        }
        total + missing_buckets.len()
    }

    pub fn report_checkpoint_stats(&self) {
        let state = self.scan.lock();
        let counts: Vec<String> = Category::ALL
            .iter()
            .map(|cat| {
                let n = state.checkpoint_files.get(cat).map_or(0, BTreeSet::len);
                format!("{n} {cat}")
            })
            .collect();
        info!(archive = %self.name(), files = %counts.join(", "), "Checkpoint files");
    }

    pub fn report_bucket_stats(&self) {
        let state = self.scan.lock();
        info!(
            archive = %self.name(),
            total = state.all_buckets.len(),
            referenced = state.referenced_buckets.len(),
            "Buckets"
        );
    }
}
