//! Copying between archives: mirroring a range, repairing gaps.
//!
//! Both operations copy whole files and try every item before reporting.
//! Failed items are logged and counted into one aggregate error, so a single
//! pass heals as much as it can.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::archive::{Archive, ArchiveInterface, CommandOptions};
use crate::error::{HistoryError, Result};
use crate::hash::Hash256;
use crate::parallel::{for_each_parallel, note_error};
use crate::paths::{bucket_path, checkpoint_path, Category};
use crate::range::Range;

/// Attempts per file before a copy is counted as failed.
const MAX_COPY_ATTEMPTS: u32 = 3;

/// What a mirror or repair pass copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub checkpoint_files: u32,
    pub buckets: u32,
    /// Files left alone because they already existed or the run was dry.
    pub skipped: u32,
}

impl CopyReport {
    /// Files actually written to the destination.
    pub fn copied(&self) -> u32 {
        self.checkpoint_files + self.buckets
    }
}

/// Result of [`copy_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
enum FileKind {
    Checkpoint,
    Bucket,
}

#[derive(Default)]
struct Tally {
    checkpoint_files: AtomicU32,
    buckets: AtomicU32,
    skipped: AtomicU32,
}

impl Tally {
    /// Count `result`, returning 1 if it failed.
    fn note(&self, kind: FileKind, result: Result<CopyOutcome>) -> u32 {
        let counter = match result {
            Ok(CopyOutcome::Skipped) => &self.skipped,
            Ok(CopyOutcome::Copied) => match kind {
                FileKind::Checkpoint => &self.checkpoint_files,
                FileKind::Bucket => &self.buckets,
            },
            Err(e) => return note_error::<()>(Err(e)),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn report(self) -> CopyReport {
        CopyReport {
            checkpoint_files: self.checkpoint_files.into_inner(),
            buckets: self.buckets.into_inner(),
            skipped: self.skipped.into_inner(),
        }
    }
}

/// Copy one file from `src` to `dst`.
///
/// Dry runs only log. An existing destination file is left alone unless
/// `opts.force` is set.
pub fn copy_path(
    src: &Archive,
    dst: &Archive,
    path: &str,
    opts: &CommandOptions,
) -> Result<CopyOutcome> {
    if opts.dry_run {
        info!(path = %path, "Dry run, skipping");
        return Ok(CopyOutcome::Skipped);
    }
    let exists = dst.backend().exists(path);
    dst.live_stats().inc_requests();
    if exists? && !opts.force {
        debug!(path = %path, "Skipping existing file");
        return Ok(CopyOutcome::Skipped);
    }

    let mut attempt = 1;
    loop {
        src.live_stats().inc_downloads();
        let copied = src.backend().get_file(path).and_then(|mut reader| {
            dst.live_stats().inc_uploads();
            dst.backend().put_file(path, &mut reader)
        });
        match copied {
            Ok(()) => return Ok(CopyOutcome::Copied),
            Err(e) if attempt < MAX_COPY_ATTEMPTS => {
                warn!(path = %path, attempt, error = %e, "Copy failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn aggregate(report: CopyReport, errors: u32, operation: &'static str) -> Result<CopyReport> {
    if errors == 0 {
        Ok(report)
    } else {
        Err(HistoryError::Aggregate {
            count: errors,
            operation,
        })
    }
}

/// Copy `opts.range` (clamped to what `src` publishes) and every bucket it
/// references from `src` to `dst`.
///
/// On success, `dst`'s root HAS is moved to the end of the range, unless
/// `dst` already points further ahead.
pub fn mirror(src: &Archive, dst: &Archive, opts: &CommandOptions) -> Result<CopyReport> {
    let root = src.get_root_has()?;
    let mgr = src.checkpoint_manager();
    let range = opts.range.clamp(&root.range(&mgr), &mgr);
    info!(src = %src.name(), dst = %dst.name(), range = %range, "Copying range");

    let tally = Tally::default();
    let seen_buckets: Mutex<HashSet<Hash256>> = Mutex::new(HashSet::new());

    let errors = for_each_parallel(opts.concurrency, range.checkpoints(&mgr), |chk| {
        let has = match src.get_checkpoint_has(chk) {
            Ok(has) => has,
            Err(e) => return note_error::<()>(Err(e)),
        };
        let mut errors = 0;
        for bucket in has.buckets() {
            if !seen_buckets.lock().insert(bucket) {
                continue;
            }
            let copied = copy_path(src, dst, &bucket_path(&bucket), opts);
            errors += tally.note(FileKind::Bucket, copied);
        }
        for category in Category::ALL {
            if opts.skip_optional && !category.is_required() {
                continue;
            }
            let copied = copy_path(src, dst, &checkpoint_path(category, chk), opts);
            errors += tally.note(FileKind::Checkpoint, copied);
        }
        errors
    })?;

    let report = tally.report();
    info!(
        files = report.checkpoint_files,
        buckets = report.buckets,
        skipped = report.skipped,
        errors,
        "Copied range"
    );
    if errors != 0 {
        return aggregate(report, errors, "mirroring");
    }

    if opts.dry_run {
        info!(range = %range, "Dry run, leaving destination root HAS alone");
    } else {
        update_root(src, dst, &range, opts)?;
    }
    Ok(report)
}

/// Point `dst`'s root HAS at `range.high`, provided that neither moves it
/// backwards nor past a gap between its current coverage and `range`.
fn update_root(src: &Archive, dst: &Archive, range: &Range, opts: &CommandOptions) -> Result<()> {
    let dst_ledger = match dst.get_root_has() {
        Ok(has) => Some(has.current_ledger),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let mgr = dst.checkpoint_manager();
    match dst_ledger {
        Some(current) if current > range.high => {
            info!(
                current = current,
                high = range.high,
                "Destination root HAS is ahead of the mirrored range, not updating"
            );
            Ok(())
        }
        Some(current) if range.low > mgr.next_checkpoint(current.saturating_add(1)) => {
            info!(
                current = current,
                low = range.low,
                "Mirrored range does not join the destination's coverage, not updating root HAS"
            );
            Ok(())
        }
        _ => {
            let has = src.get_checkpoint_has(range.high)?;
            info!(ledger = has.current_ledger, "Updating destination root HAS");
            dst.put_root_has(&has, opts)
        }
    }
}

/// Copy into `dst` every checkpoint file and bucket that it lacks and `src` has.
///
/// The range is clamped to what both archives publish. Optional categories
/// are skipped with `opts.skip_optional`.
pub fn repair(src: &Archive, dst: &Archive, opts: &CommandOptions) -> Result<CopyReport> {
    let mgr = dst.checkpoint_manager();
    let dst_root = dst.get_root_has()?;
    let src_root = src.get_root_has()?;
    let range = opts
        .range
        .clamp(&dst_root.range(&mgr), &mgr)
        .clamp(&src_root.range(&mgr), &mgr);
    let scan_opts = CommandOptions {
        range,
        ..opts.clone()
    };

    info!(src = %src.name(), dst = %dst.name(), range = %range, "Starting scan for repair");
    let mut errors = note_error(dst.scan_checkpoints(&scan_opts));
    let tally = Tally::default();

    info!("Examining checkpoint files for gaps");
    let mut repaired_history = false;
    for (category, missing) in dst.check_checkpoint_files_missing(&range) {
        if opts.skip_optional && !category.is_required() {
            continue;
        }
        for chk in missing {
            let path = checkpoint_path(category, chk);
            match src.category_checkpoint_exists(category, chk) {
                Ok(true) => {}
                Ok(false) => {
                    info!(path = %path, "Missing file not present at source either, skipping");
                    continue;
                }
                Err(e) => {
                    errors += note_error::<()>(Err(e));
                    continue;
                }
            }
            info!(path = %path, "Repairing");
            let copied = copy_path(src, dst, &path, opts);
            if category == Category::History && matches!(copied, Ok(CopyOutcome::Copied)) {
                repaired_history = true;
            }
            errors += tally.note(FileKind::Checkpoint, copied);
        }
    }

    // New history files may reference buckets the first scan never saw.
    if repaired_history {
        info!("Re-running checkpoint scan for bucket repair");
        dst.clear_cached_info();
        errors += note_error(dst.scan_checkpoints(&scan_opts));
    }

    errors += note_error(dst.scan_buckets(&scan_opts));
    info!("Examining buckets referenced by checkpoints");
    for bucket in dst.check_buckets_missing() {
        let path = bucket_path(&bucket);
        match src.bucket_exists(&bucket) {
            Ok(true) => {}
            Ok(false) => {
                info!(path = %path, "Missing bucket not present at source either, skipping");
                continue;
            }
            Err(e) => {
                errors += note_error::<()>(Err(e));
                continue;
            }
        }
        info!(path = %path, "Repairing");
        errors += tally.note(FileKind::Bucket, copy_path(src, dst, &path, opts));
    }

    aggregate(tally.report(), errors, "repairing")
}
