//! Object storage for Stellar history archives.
//!
//! Every archive lives behind a [`StorageBackend`]: a flat namespace of
//! `/`-separated paths holding immutable byte objects. Backends are chosen by
//! URL scheme with [`connect_backend`]:
//!
//! | Scheme            | Backend            | Listing | Writes |
//! |-------------------|--------------------|---------|--------|
//! | `file://`         | [`FsStorage`]      | yes     | yes    |
//! | `http(s)://`      | [`HttpStorage`]    | no      | no     |
//! | `s3://`, `gcs://` | [`CloudStorage`]   | yes     | yes    |
//! | `mock://`         | [`MockStorage`]    | yes     | yes    |
//!
//! [`DiskCache`] wraps any backend with a bounded local cache that is safe
//! to populate from several threads at once.
//!
//! All I/O is blocking. Timeouts are fixed when a backend is constructed.

pub mod backend;
pub mod cache_index;
pub mod cloud;
pub mod disk_cache;
pub mod error;
pub mod fs;
pub mod http;
pub mod mock;

pub use backend::{
    connect_backend, ConnectOptions, FileListing, ObjectRead, ObjectReader, StorageBackend,
    DEFAULT_S3_REGION, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use cloud::CloudStorage;
pub use disk_cache::{lockfile_path, CacheOutcome, DiskCache, DEFAULT_MAX_FILES};
pub use error::{Result, StorageError};
pub use fs::FsStorage;
pub use http::HttpStorage;
pub use cache_index::CacheIndex;
pub use mock::MockStorage;
