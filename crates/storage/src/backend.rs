//! The object-store abstraction shared by every backend, and URL dispatch.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cloud::CloudStorage;
use crate::error::{Result, StorageError};
use crate::fs::FsStorage;
use crate::http::HttpStorage;
use crate::mock::MockStorage;

/// Default request timeout for network backends.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default `User-Agent` sent by the HTTP backend.
pub const DEFAULT_USER_AGENT: &str = concat!("stellar-archivist/", env!("CARGO_PKG_VERSION"));

/// Default S3 region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// A readable object with an explicit, idempotent close.
///
/// Dropping a reader releases it as well; `close` exists so callers can
/// observe errors that only surface at release time (for example, a cache
/// population that failed to complete).
pub trait ObjectRead: Read + Send {
    /// Release the reader, returning the first error encountered while doing so.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Boxed reader returned by [`StorageBackend::get_file`].
pub type ObjectReader = Box<dyn ObjectRead>;

/// Lazy listing of object paths. A listing error is yielded once and ends the listing.
pub type FileListing = Box<dyn Iterator<Item = Result<String>> + Send>;

impl ObjectRead for std::fs::File {}
impl ObjectRead for Cursor<Vec<u8>> {}

impl<R: ObjectRead + ?Sized> ObjectRead for Box<R> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Uniform byte-object interface over the supported stores.
///
/// Paths are `/`-separated and relative to the backend root
/// (e.g. `bucket/01/02/03/bucket-<hash>.xdr.gz`).
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Whether an object exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Size in bytes of the object at `path`.
    fn size(&self, path: &str) -> Result<u64>;

    /// Open the object at `path` for reading.
    fn get_file(&self, path: &str) -> Result<ObjectReader>;

    /// Store everything readable from `reader` at `path`.
    fn put_file(&self, path: &str, reader: &mut dyn Read) -> Result<()>;

    /// List all objects beneath `prefix`, recursively.
    fn list_files(&self, prefix: &str) -> FileListing;

    /// Whether [`list_files`](Self::list_files) is supported.
    fn can_list_files(&self) -> bool;

    /// Release backend resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Options fixed at backend construction time.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Timeout applied to each network request.
    pub timeout: Duration,
    /// `User-Agent` header for HTTP archives.
    pub user_agent: String,
    /// S3 region.
    pub s3_region: String,
    /// Custom S3-compatible endpoint.
    pub s3_endpoint: Option<String>,
    /// Skip request signing (public buckets).
    pub unsigned_requests: bool,
    /// Path to a GCS service-account credential file.
    pub gcs_credential_path: Option<String>,
    /// Custom GCS endpoint.
    pub gcs_endpoint: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            s3_region: DEFAULT_S3_REGION.to_string(),
            s3_endpoint: None,
            unsigned_requests: false,
            gcs_credential_path: None,
            gcs_endpoint: None,
        }
    }
}

/// Connect to the backend named by `url`.
///
/// Supported schemes: `s3://`, `gcs://`, `file://`, `http://`, `https://`,
/// `mock://` and `fmock://` (a mock whose readers fail mid-stream).
pub fn connect_backend(url: &str, opts: &ConnectOptions) -> Result<Arc<dyn StorageBackend>> {
    if url.is_empty() {
        return Err(StorageError::EmptyUrl);
    }

    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| StorageError::UnsupportedScheme(url.to_string()))?;

    debug!(url = %url, scheme = %scheme, "Connecting storage backend");

    let backend: Arc<dyn StorageBackend> = match scheme {
        "file" => Arc::new(FsStorage::new(rest)),
        "http" | "https" => Arc::new(HttpStorage::new(url, opts)?),
        "s3" => Arc::new(CloudStorage::s3(rest, opts)?),
        "gcs" => Arc::new(CloudStorage::gcs(rest, opts)?),
        "mock" => Arc::new(MockStorage::new()),
        "fmock" => Arc::new(MockStorage::failing()),
        other => return Err(StorageError::UnsupportedScheme(other.to_string())),
    };
    Ok(backend)
}

/// Split `bucket/some/prefix` into the bucket name and a rooted prefix.
pub(crate) fn split_bucket_prefix(rest: &str) -> (String, String) {
    let trimmed = rest.trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket.to_string(), format!("/{}", prefix.trim_matches('/'))),
        None => (trimmed.to_string(), "/".to_string()),
    }
}

/// Normalize a listing prefix to a directory form without leading slash.
pub(crate) fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
