//! Error types for history archive operations.

use archivist_storage::StorageError;
use thiserror::Error;

use crate::hash::Hash256;

/// Errors that can occur during history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A file the operation needs is not published.
    #[error("not found: {0}")]
    NotFound(String),

    /// The archive belongs to a different network than the one configured.
    #[error("Network passphrase does not match! expected={expected} actual={actual}")]
    NetworkPassphraseMismatch { expected: String, actual: String },

    /// A checkpoint needed for a ledger range has not been published.
    #[error("checkpoint {0} is not published")]
    UnpublishedCheckpoint(u32),

    /// A file failed to decode part way through.
    #[error("corrupt file {path}: {message}")]
    CorruptFile { path: String, message: String },

    /// A packed total-order ID field is out of range.
    #[error("index overflow: {0}")]
    IndexOverflow(String),

    /// A ledger range with start after end.
    #[error("range is invalid, start: {start} end: {end}")]
    InvalidRange { start: u32, end: u32 },

    /// A ledger was not found in the checkpoint that should hold it.
    #[error("ledger header {0} not found in checkpoint")]
    LedgerNotFound(u32),

    /// Stream reads are only supported for `.xdr.gz` files.
    #[error("file has non-.xdr.gz suffix: {0}")]
    InvalidPath(String),

    /// Data did not hash to the value it is addressed by.
    #[error("hash mismatch for {what}: expected {expected}, got {actual}")]
    HashMismatch {
        what: String,
        expected: Hash256,
        actual: Hash256,
    },

    /// Parallel work was requested with no workers.
    #[error("zero concurrency")]
    ZeroConcurrency,

    /// No pool member could be connected.
    #[error("no archives in pool: {0}")]
    EmptyPool(String),

    /// Several items of a bulk operation failed; each was logged as it happened.
    #[error("{count} errors while {operation}")]
    Aggregate { count: u32, operation: &'static str },

    /// Verification found objects whose hashes disagree with what was expected.
    #[error("Detected {0} objects with unexpected hashes")]
    InvalidObjects(u32),

    /// Storage backend error, including connection and URL scheme failures.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XDR encoding error.
    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HistoryError {
    /// Whether this error means the requested object is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            HistoryError::NotFound(_) => true,
            HistoryError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
