//! Inclusive ledger ranges.

use std::collections::BTreeSet;
use std::fmt;

use crate::checkpoint::CheckpointManager;
use crate::paths::DirPrefix;

/// Inclusive `[low, high]` ledger interval.
///
/// Ranges built through [`CheckpointManager::make_range`] or
/// [`Range::clamp`] have checkpoint-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub low: u32,
    pub high: u32,
}

impl Range {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Intersect with `other`, then re-align to checkpoints.
    pub fn clamp(&self, other: &Range, mgr: &CheckpointManager) -> Range {
        let low = self.low.max(other.low);
        let high = self.high.min(other.high);
        mgr.make_range(low, high)
    }

    /// Whether `seq` lies within the range.
    pub fn in_range(&self, seq: u32) -> bool {
        self.low <= seq && seq <= self.high
    }

    /// Every checkpoint from `low` up to and including `high`, stepping by the frequency.
    pub fn checkpoints(&self, mgr: &CheckpointManager) -> impl Iterator<Item = u32> {
        let first = mgr.next_checkpoint(self.low);
        let high = self.high;
        let step = mgr.frequency();
        std::iter::successors(Some(first), move |&c| c.checked_add(step))
            .take_while(move |&c| c <= high)
    }

    /// Number of checkpoints in an aligned range.
    pub fn size_in_checkpoints(&self, mgr: &CheckpointManager) -> u32 {
        if self.high < self.low {
            return 0;
        }
        1 + (self.high - self.low) / mgr.frequency()
    }

    /// Distinct shard directories holding this range's checkpoint files.
    pub fn dir_prefixes(&self, mgr: &CheckpointManager) -> Vec<DirPrefix> {
        let prefixes: BTreeSet<DirPrefix> = self
            .checkpoints(mgr)
            .map(DirPrefix::for_checkpoint)
            .collect();
        prefixes.into_iter().collect()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:08x}, 0x{:08x}]", self.low, self.high)
    }
}

/// Render sorted checkpoints compactly, collapsing consecutive runs.
///
/// ```
/// use archivist_history::{range::fmt_range_list, CheckpointManager};
///
/// let mgr = CheckpointManager::default();
/// assert_eq!(
///     fmt_range_list(&[0x3f, 0x7f, 0xbf, 0x13f], &mgr),
///     "0x0000003f-0x000000bf, 0x0000013f"
/// );
/// ```
pub fn fmt_range_list(checkpoints: &[u32], mgr: &CheckpointManager) -> String {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &chk in checkpoints {
        match runs.last_mut() {
            Some((_, end)) if end.checked_add(mgr.frequency()) == Some(chk) => *end = chk,
            _ => runs.push((chk, chk)),
        }
    }
    runs.iter()
        .map(|&(start, end)| {
            if start == end {
                format!("0x{start:08x}")
            } else {
                format!("0x{start:08x}-0x{end:08x}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
