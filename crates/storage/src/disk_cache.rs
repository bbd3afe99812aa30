//! A bounded on-disk cache in front of another backend.
//!
//! Cached files live under the cache directory at the same relative path they
//! have upstream. While a file is being populated a sibling `<file>.lock`
//! exists; readers that see a lockfile go straight upstream, so partially
//! written files are never served. Only the LRU index decides what counts as
//! fully cached, and a file enters it only once its population completed.
//!
//! Concurrent misses on the same key are not merged: each fetches upstream.
//! Only the first one to claim the lockfile writes the local copy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{FileListing, ObjectRead, ObjectReader, StorageBackend};
use crate::error::{Result, StorageError};
use crate::cache_index::CacheIndex;

/// Default number of cached files: roughly 90 days of checkpoints
/// (90 * 86_400 / (5 * 64)).
pub const DEFAULT_MAX_FILES: usize = 24_300;

type Index = Arc<Mutex<CacheIndex>>;

/// Where a [`DiskCache::get_file_tracked`] read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the local copy.
    Hit,
    /// Fetched upstream (and populated locally when possible).
    Miss,
    /// Fetched upstream because another population was in progress.
    Bypass,
}

/// Disk-backed LRU cache wrapping an upstream backend.
pub struct DiskCache {
    upstream: Arc<dyn StorageBackend>,
    dir: PathBuf,
    index: Index,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("upstream", &self.upstream)
            .field("dir", &self.dir)
            .field("cached", &self.index.lock().len())
            .finish()
    }
}

/// Path of the lockfile guarding `local`.
pub fn lockfile_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

pub(crate) fn remove_cached(local: &Path) {
    let _ = fs::remove_file(lockfile_path(local));
    if let Err(e) = fs::remove_file(local) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %local.display(), error = %e, "Removal failed after cache eviction");
        }
    }
}

impl DiskCache {
    /// Wrap `upstream` with a cache in `dir` holding at most `max_files`
    /// files (0 selects [`DEFAULT_MAX_FILES`]).
    ///
    /// Files already present in `dir` are adopted lazily on first access.
    pub fn new(
        upstream: Arc<dyn StorageBackend>,
        dir: impl Into<PathBuf>,
        max_files: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        let max_files = if max_files == 0 {
            DEFAULT_MAX_FILES
        } else {
            max_files
        };
        fs::create_dir_all(&dir)?;

        let index = CacheIndex::new(max_files);
        info!(path = %dir.display(), size = max_files, "Filesystem cache configured");

        Ok(Self {
            upstream,
            dir,
            index: Arc::new(Mutex::new(index)),
        })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The wrapped backend.
    pub fn upstream(&self) -> &Arc<dyn StorageBackend> {
        &self.upstream
    }

    fn local_path(&self, path: &str) -> PathBuf {
        self.dir.join(path.trim_start_matches('/'))
    }

    /// Whether `path` is fully cached, without touching recency.
    pub fn is_cached(&self, path: &str) -> bool {
        self.index.lock().contains(&self.local_path(path))
    }

    /// Like [`StorageBackend::get_file`], also reporting where the data came from.
    pub fn get_file_tracked(&self, path: &str) -> Result<(ObjectReader, CacheOutcome)> {
        let local = self.local_path(path);

        if lockfile_path(&local).exists() {
            debug!(key = %path, "Incomplete file in cache, reading upstream");
            return Ok((self.upstream.get_file(path)?, CacheOutcome::Bypass));
        }

        let indexed = self.index.lock().touch(&local);
        if !indexed {
            // May still be on disk from an earlier run over the same directory.
            if let Ok(file) = File::open(&local) {
                // A population may have started since the first lockfile check.
                if lockfile_path(&local).exists() {
                    debug!(key = %path, "Incomplete file in cache, reading upstream");
                    return Ok((self.upstream.get_file(path)?, CacheOutcome::Bypass));
                }
                debug!(key = %path, "Found file on disk but not in cache, adding");
                self.index.lock().add(local);
                return Ok((Box::new(file), CacheOutcome::Hit));
            }

            debug!(key = %path, "Retrieving file from upstream");
            let remote = self.upstream.get_file(path)?;
            return match self.create_local(&local) {
                Ok(Some(file)) => Ok((
                    Box::new(TeeReader {
                        remote,
                        local: Some(BufWriter::new(file)),
                        local_path: local,
                        index: self.index.clone(),
                        closed: false,
                    }),
                    CacheOutcome::Miss,
                )),
                Ok(None) => Ok((remote, CacheOutcome::Bypass)),
                Err(e) => {
                    warn!(key = %path, error = %e, "Caching file failed");
                    Ok((remote, CacheOutcome::Miss))
                }
            };
        }

        match File::open(&local) {
            Ok(file) => {
                debug!(key = %path, "Found file in cache");
                Ok((Box::new(file), CacheOutcome::Hit))
            }
            Err(e) => {
                warn!(key = %path, error = %e, "Opening cached file failed, evicting");
                self.index.lock().remove(&local);
                self.get_file_tracked(path)
            }
        }
    }

    /// Drop `path` from the cache and the cache directory. Upstream is untouched.
    pub fn evict(&self, path: &str) {
        debug!(key = %path, "Evicting file");
        self.index.lock().remove(&self.local_path(path));
    }

    /// Claim the lockfile and create the local file. `None` means another
    /// population holds the lock.
    fn create_local(&self, local: &Path) -> io::Result<Option<File>> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lockfile_path(local))
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        }
        // Unlink rather than truncate, so readers holding the old copy keep it whole.
        if let Err(e) = fs::remove_file(local) {
            if e.kind() != io::ErrorKind::NotFound {
                let _ = fs::remove_file(lockfile_path(local));
                return Err(e);
            }
        }
        match File::create(local) {
            Ok(file) => Ok(Some(file)),
            Err(e) => {
                let _ = fs::remove_file(lockfile_path(local));
                Err(e)
            }
        }
    }
}

/// Finish a local copy: flush it, index it, then release the lockfile.
fn commit_local(writer: BufWriter<File>, local: &Path, index: &Index) -> io::Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    index.lock().add(local.to_path_buf());
    fs::remove_file(lockfile_path(local))
}

/// Discard a local copy and its lockfile.
fn abandon_local(local: &Path) {
    let _ = fs::remove_file(local);
    let _ = fs::remove_file(lockfile_path(local));
}

/// Streams upstream data to the caller while writing it to the local copy.
///
/// Closing drains whatever the caller left unread so the local copy is
/// complete before it is indexed. Dropping closes.
struct TeeReader {
    remote: ObjectReader,
    local: Option<BufWriter<File>>,
    local_path: PathBuf,
    index: Index,
    closed: bool,
}

impl Read for TeeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.remote.read(buf)?;
        if n > 0 {
            if let Some(local) = self.local.as_mut() {
                if let Err(e) = local.write_all(&buf[..n]) {
                    warn!(path = %self.local_path.display(), error = %e, "Writing cache file failed");
                    self.local = None;
                    abandon_local(&self.local_path);
                }
            }
        }
        Ok(n)
    }
}

impl ObjectRead for TeeReader {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first: Option<StorageError> = None;

        if let Some(mut local) = self.local.take() {
            let drained = io::copy(&mut self.remote, &mut local)
                .and_then(|_| commit_local(local, &self.local_path, &self.index));
            if let Err(e) = drained {
                warn!(path = %self.local_path.display(), error = %e, "Failed to download and cache file");
                self.index.lock().remove(&self.local_path);
                abandon_local(&self.local_path);
                first = Some(e.into());
            }
        }

        if let Err(e) = self.remote.close() {
            first.get_or_insert(e);
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TeeReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Copies everything read from `inner` into the local cache file.
struct TeeWrite<'a> {
    inner: &'a mut dyn Read,
    local: Option<BufWriter<File>>,
    local_path: &'a Path,
}

impl Read for TeeWrite<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            if let Some(local) = self.local.as_mut() {
                if let Err(e) = local.write_all(&buf[..n]) {
                    warn!(path = %self.local_path.display(), error = %e, "Failed to put file locally");
                    self.local = None;
                    abandon_local(self.local_path);
                }
            }
        }
        Ok(n)
    }
}

impl StorageBackend for DiskCache {
    fn exists(&self, path: &str) -> Result<bool> {
        debug!(key = %path, "Checking existence");
        if self.index.lock().touch(&self.local_path(path)) {
            return Ok(true);
        }
        self.upstream.exists(path)
    }

    fn size(&self, path: &str) -> Result<u64> {
        let local = self.local_path(path);
        if self.index.lock().touch(&local) {
            match fs::metadata(&local) {
                Ok(meta) => return Ok(meta.len()),
                Err(e) => {
                    debug!(key = %path, error = %e, "Cached size unavailable, evicting");
                    self.index.lock().remove(&local);
                }
            }
        }
        self.upstream.size(path)
    }

    fn get_file(&self, path: &str) -> Result<ObjectReader> {
        self.get_file_tracked(path).map(|(reader, _)| reader)
    }

    fn put_file(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let local_path = self.local_path(path);
        // The old copy stops counting as cached before it is replaced.
        self.index.lock().remove(&local_path);
        let local = match self.create_local(&local_path) {
            Ok(file) => file.map(BufWriter::new),
            Err(e) => {
                warn!(key = %path, error = %e, "Failed to put file locally");
                None
            }
        };
        let mut tee = TeeWrite {
            inner: reader,
            local,
            local_path: &local_path,
        };
        let result = self.upstream.put_file(path, &mut tee);

        // A local write failure has already discarded the copy.
        if let Some(local) = tee.local.take() {
            if result.is_ok() {
                if let Err(e) = commit_local(local, &local_path, &self.index) {
                    warn!(key = %path, error = %e, "Failed to put file locally");
                    abandon_local(&local_path);
                }
            } else {
                abandon_local(&local_path);
            }
        }
        result
    }

    fn list_files(&self, prefix: &str) -> FileListing {
        self.upstream.list_files(prefix)
    }

    fn can_list_files(&self) -> bool {
        self.upstream.can_list_files()
    }

    /// Forget every cached entry, then close upstream.
    fn close(&self) -> Result<()> {
        self.index.lock().purge();
        self.upstream.close()
    }
}
