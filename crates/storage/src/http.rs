//! Read-only HTTP(S) backend.

use std::io::{self, Read};

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::backend::{ConnectOptions, FileListing, ObjectRead, ObjectReader, StorageBackend};
use crate::error::{Result, StorageError};

/// Archive published over HTTP. Cannot list or write.
#[derive(Debug)]
pub struct HttpStorage {
    base: Url,
    client: Client,
}

impl HttpStorage {
    /// Create a backend for the archive rooted at `base`.
    ///
    /// Timeout and user agent are fixed for the lifetime of the backend.
    pub fn new(base: &str, opts: &ConnectOptions) -> Result<Self> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        // Built without reqwest's `gzip` feature, so `.xdr.gz` bodies arrive undecoded.
        let client = Client::builder()
            .timeout(opts.timeout)
            .user_agent(opts.user_agent.clone())
            .build()?;

        Ok(Self { base, client })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn check_status(url: &Url, path: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn head(&self, path: &str) -> Result<Response> {
        let url = self.url_for(path)?;
        let response = self
            .client
            .head(url.clone())
            .send()
            .map_err(|e| StorageError::Connection(format!("HEAD {url}: {e}")))?;
        Self::check_status(&url, path, response)
    }
}

/// Body of an in-flight GET.
struct HttpBody(Response);

impl Read for HttpBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl ObjectRead for HttpBody {}

impl StorageBackend for HttpStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        match self.head(path) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn size(&self, path: &str) -> Result<u64> {
        let response = self.head(path)?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StorageError::Backend(format!("no content length for {path}")))
    }

    fn get_file(&self, path: &str) -> Result<ObjectReader> {
        let url = self.url_for(path)?;
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| StorageError::Connection(format!("GET {url}: {e}")))?;
        let response = Self::check_status(&url, path, response)?;
        Ok(Box::new(HttpBody(response)))
    }

    fn put_file(&self, _path: &str, _reader: &mut dyn Read) -> Result<()> {
        Err(StorageError::ReadOnly("http"))
    }

    fn list_files(&self, _prefix: &str) -> FileListing {
        Box::new(std::iter::once(Err(StorageError::Backend(
            "http backend cannot list files".to_string(),
        ))))
    }

    fn can_list_files(&self) -> bool {
        false
    }
}
