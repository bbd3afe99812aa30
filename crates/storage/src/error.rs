//! Error types for storage backends.

use thiserror::Error;

/// Errors that can occur while talking to an object store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The URL scheme has no backend.
    #[error("unsupported storage scheme: {0}")]
    UnsupportedScheme(String),

    /// An empty URL was supplied.
    #[error("URL is empty")]
    EmptyUrl,

    /// The URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The backend does not accept writes.
    #[error("{0} backend is read-only")]
    ReadOnly(&'static str),

    /// Any other backend failure, with context.
    #[error("{0}")]
    Backend(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Connection(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
