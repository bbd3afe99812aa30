//! Stellar history archive access and maintenance.
//!
//! A history archive publishes ledger data in checkpoints of 64 ledgers. Each
//! checkpoint has a history archive state (HAS) file naming the bucket list at
//! that ledger, plus gzipped XDR streams of ledger headers, transactions,
//! results and SCP messages. Buckets are stored by content hash.
//!
//! # Components
//!
//! - [`Archive`]: one archive endpoint over any
//!   [`StorageBackend`](archivist_storage::StorageBackend), optionally fronted
//!   by a [`DiskCache`](archivist_storage::DiskCache)
//! - [`ArchivePool`]: several archives publishing the same data, with failover
//!   for existence checks and HAS access
//! - [`CheckpointManager`] and [`Range`]: checkpoint-boundary arithmetic
//! - [`XdrStream`]: reader for framed (and usually gzipped) XDR files
//! - Scanning and verification (methods on [`Archive`]), plus [`mirror`] and
//!   [`repair`] for copying between archives
//!
//! # Example
//!
//! ```no_run
//! use archivist_history::{Archive, ArchiveInterface, ArchiveOptions};
//!
//! # fn main() -> archivist_history::Result<()> {
//! let archive = Archive::connect(
//!     "https://history.stellar.org/prd/core-live/core_live_001",
//!     &ArchiveOptions::default(),
//! )?;
//! let has = archive.get_root_has()?;
//! println!("latest checkpoint: {}", has.current_ledger);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod archive_state;
pub mod checkpoint;
pub mod error;
pub mod hash;
mod parallel;
pub mod paths;
pub mod pool;
pub mod range;
pub mod repair;
pub mod scan;
pub mod stats;
pub mod toid;
pub mod verify;
pub mod xdr_stream;

pub use archive::{Archive, ArchiveInterface, ArchiveOptions, CommandOptions, Ledger};
pub use archive_state::HistoryArchiveState;
pub use checkpoint::{CheckpointManager, DEFAULT_CHECKPOINT_FREQUENCY};
pub use error::{HistoryError, Result};
pub use hash::Hash256;
pub use paths::Category;
pub use pool::ArchivePool;
pub use range::Range;
pub use repair::{copy_path, mirror, repair, CopyOutcome, CopyReport};
pub use stats::StatsSnapshot;
pub use xdr_stream::XdrStream;
