//! S3 and GCS backends built on opendal.
//!
//! opendal is async; the backend owns a current-thread tokio runtime and
//! blocks on it, so callers see the same synchronous interface as every other
//! backend. Objects are streamed in chunks in both directions.

use std::future::IntoFuture;
use std::io::{self, Read};
use std::sync::Arc;

use opendal::services::{Gcs, S3};
use opendal::{ErrorKind, Operator, Reader};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::backend::{
    dir_prefix, split_bucket_prefix, ConnectOptions, FileListing, ObjectRead, ObjectReader,
    StorageBackend,
};
use crate::error::{Result, StorageError};

/// Bytes fetched or uploaded per request. Above the S3 multipart minimum.
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Object-store backed archive (`s3://bucket/prefix` or `gcs://bucket/prefix`).
pub struct CloudStorage {
    service: &'static str,
    op: Operator,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for CloudStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStorage")
            .field("service", &self.service)
            .field("info", &self.op.info().root())
            .finish()
    }
}

impl CloudStorage {
    /// Connect to `bucket[/prefix]` on S3.
    pub fn s3(rest: &str, opts: &ConnectOptions) -> Result<Self> {
        let (bucket, root) = split_bucket_prefix(rest);
        let mut builder = S3::default()
            .bucket(&bucket)
            .root(&root)
            .region(&opts.s3_region);
        if let Some(endpoint) = &opts.s3_endpoint {
            builder = builder.endpoint(endpoint);
        }
        if opts.unsigned_requests {
            builder = builder.allow_anonymous();
        }
        let op = Operator::new(builder)
            .map_err(|e| StorageError::Backend(format!("opendal s3 builder: {e}")))?
            .finish();
        Self::with_operator("s3", op)
    }

    /// Connect to `bucket[/prefix]` on Google Cloud Storage.
    pub fn gcs(rest: &str, opts: &ConnectOptions) -> Result<Self> {
        let (bucket, root) = split_bucket_prefix(rest);
        let mut builder = Gcs::default().bucket(&bucket).root(&root);
        if let Some(path) = &opts.gcs_credential_path {
            builder = builder.credential_path(path);
        }
        if let Some(endpoint) = &opts.gcs_endpoint {
            builder = builder.endpoint(endpoint);
        }
        if opts.unsigned_requests {
            builder = builder.allow_anonymous();
        }
        let op = Operator::new(builder)
            .map_err(|e| StorageError::Backend(format!("opendal gcs builder: {e}")))?
            .finish();
        Self::with_operator("gcs", op)
    }

    fn with_operator(service: &'static str, op: Operator) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        debug!(service, root = %op.info().root(), "Cloud backend configured");
        Ok(Self {
            service,
            op,
            runtime: Arc::new(runtime),
        })
    }

    fn block_on<F: IntoFuture>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut.into_future())
    }

    fn map_err(&self, what: &str, path: &str, e: opendal::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Backend(format!("{} {} {}: {}", self.service, what, path, e))
        }
    }
}

impl StorageBackend for CloudStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        match self.block_on(self.op.stat(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.map_err("stat", path, e)),
        }
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.block_on(self.op.stat(path))
            .map(|meta| meta.content_length())
            .map_err(|e| self.map_err("stat", path, e))
    }

    fn get_file(&self, path: &str) -> Result<ObjectReader> {
        let len = self.size(path)?;
        let reader = self
            .block_on(self.op.reader(path))
            .map_err(|e| self.map_err("read", path, e))?;
        Ok(Box::new(CloudReader {
            path: path.to_string(),
            reader,
            runtime: self.runtime.clone(),
            len,
            offset: 0,
            chunk: Vec::new(),
            pos: 0,
        }))
    }

    fn put_file(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let mut writer = self
            .block_on(self.op.writer_with(path).chunk(CHUNK_SIZE))
            .map_err(|e| self.map_err("write", path, e))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let written = loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(StorageError::from(e)),
            };
            if let Err(e) = self.block_on(writer.write(buf[..n].to_vec())) {
                break Err(self.map_err("write", path, e));
            }
        };

        match written {
            Ok(()) => {
                self.block_on(writer.close())
                    .map_err(|e| self.map_err("write", path, e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self.block_on(writer.abort()) {
                    warn!(path = %path, error = %abort, "Aborting upload failed");
                }
                Err(e)
            }
        }
    }

    fn list_files(&self, prefix: &str) -> FileListing {
        let dir = dir_prefix(prefix);
        let listed = self.block_on(self.op.list_with(&dir).recursive(true));
        match listed {
            Ok(entries) => {
                let paths: Vec<Result<String>> = entries
                    .into_iter()
                    .filter(|e| e.metadata().mode().is_file())
                    .map(|e| Ok(e.path().trim_start_matches('/').to_string()))
                    .collect();
                Box::new(paths.into_iter())
            }
            Err(e) => Box::new(std::iter::once(Err(self.map_err("list", &dir, e)))),
        }
    }

    fn can_list_files(&self) -> bool {
        true
    }
}

/// Reads an object one ranged request at a time.
struct CloudReader {
    path: String,
    reader: Reader,
    runtime: Arc<Runtime>,
    len: u64,
    offset: u64,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for CloudReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.chunk.len() {
            if self.offset >= self.len {
                return Ok(0);
            }
            let end = self.len.min(self.offset + CHUNK_SIZE as u64);
            let fetched = self
                .runtime
                .block_on(self.reader.read(self.offset..end))
                .map_err(|e| io::Error::other(format!("reading {}: {e}", self.path)))?;
            self.chunk = fetched.to_vec();
            self.pos = 0;
            if self.chunk.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} ended at byte {} of {}", self.path, self.offset, self.len),
                ));
            }
            self.offset += self.chunk.len() as u64;
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl ObjectRead for CloudReader {}
