//! Checkpoint arithmetic.
//!
//! History is published in checkpoints: a checkpoint is identified by its
//! final ledger, a sequence `n` with `(n + 1) % frequency == 0`. With the
//! default frequency of 64:
//!
//! - Checkpoint 63 contains ledgers 1-63
//! - Checkpoint 127 contains ledgers 64-127
//! - Checkpoint 191 contains ledgers 128-191

use crate::range::Range;

/// Default number of ledgers per checkpoint.
pub const DEFAULT_CHECKPOINT_FREQUENCY: u32 = 64;

/// Maps ledger sequences to checkpoint boundaries for a given frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointManager {
    frequency: u32,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_FREQUENCY)
    }
}

impl CheckpointManager {
    /// A manager for `frequency` ledgers per checkpoint; 0 selects the default.
    pub fn new(frequency: u32) -> Self {
        let frequency = if frequency == 0 {
            DEFAULT_CHECKPOINT_FREQUENCY
        } else {
            frequency
        };
        Self { frequency }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Whether `i` is the last ledger of a checkpoint.
    ///
    /// ```
    /// use archivist_history::CheckpointManager;
    ///
    /// let mgr = CheckpointManager::default();
    /// assert!(mgr.is_checkpoint(63));
    /// assert!(!mgr.is_checkpoint(64));
    /// ```
    pub fn is_checkpoint(&self, i: u32) -> bool {
        (u64::from(i) + 1) % u64::from(self.frequency) == 0
    }

    /// The checkpoint at or after `i`, saturating at `u32::MAX`.
    ///
    /// ```
    /// use archivist_history::CheckpointManager;
    ///
    /// let mgr = CheckpointManager::default();
    /// assert_eq!(mgr.next_checkpoint(0), 63);
    /// assert_eq!(mgr.next_checkpoint(63), 63);
    /// assert_eq!(mgr.next_checkpoint(100), 127);
    /// ```
    pub fn next_checkpoint(&self, i: u32) -> u32 {
        let freq = u64::from(self.frequency);
        if i == 0 {
            return self.frequency - 1;
        }
        let v = ((u64::from(i) + freq) / freq) * freq - 1;
        u32::try_from(v).unwrap_or(u32::MAX)
    }

    /// The checkpoint at or before `i`; the first checkpoint for ledgers before it.
    ///
    /// ```
    /// use archivist_history::CheckpointManager;
    ///
    /// let mgr = CheckpointManager::default();
    /// assert_eq!(mgr.prev_checkpoint(100), 63);
    /// assert_eq!(mgr.prev_checkpoint(10), 63);
    /// assert_eq!(mgr.prev_checkpoint(127), 127);
    /// ```
    pub fn prev_checkpoint(&self, i: u32) -> u32 {
        let freq = u64::from(self.frequency);
        if i < self.frequency {
            return self.frequency - 1;
        }
        let v = ((u64::from(i) + 1) / freq) * freq - 1;
        // `v <= i` always holds here.
        v as u32
    }

    /// The checkpoint whose files contain ledger `i`.
    pub fn get_checkpoint(&self, i: u32) -> u32 {
        self.next_checkpoint(i)
    }

    /// The ledgers contained in the checkpoint holding `i`.
    ///
    /// The first checkpoint starts at ledger 1, there is no ledger 0.
    pub fn get_checkpoint_range(&self, i: u32) -> Range {
        let high = self.get_checkpoint(i);
        let low = (u64::from(high) + 1).saturating_sub(u64::from(self.frequency)).max(1);
        Range {
            low: low as u32,
            high,
        }
    }

    /// A checkpoint-aligned range covering `[low, high]`. `high` is raised to
    /// `low` if it is smaller.
    ///
    /// ```
    /// use archivist_history::CheckpointManager;
    ///
    /// let mgr = CheckpointManager::default();
    /// let r = mgr.make_range(100, 10);
    /// assert_eq!((r.low, r.high), (63, 127));
    /// ```
    pub fn make_range(&self, low: u32, high: u32) -> Range {
        let high = high.max(low);
        Range {
            low: self.prev_checkpoint(low),
            high: self.next_checkpoint(high),
        }
    }
}
