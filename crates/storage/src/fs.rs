//! Local filesystem backend.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::backend::{FileListing, ObjectReader, StorageBackend};
use crate::error::{Result, StorageError};

/// Archive rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create a backend rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn not_found(path: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}

impl StorageBackend for FsStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.full_path(path)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self, path: &str) -> Result<u64> {
        fs::metadata(self.full_path(path))
            .map(|m| m.len())
            .map_err(|e| not_found(path, e))
    }

    fn get_file(&self, path: &str) -> Result<ObjectReader> {
        let file = File::open(self.full_path(path)).map_err(|e| not_found(path, e))?;
        Ok(Box::new(file))
    }

    fn put_file(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let target = self.full_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let mut staging = target.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let written = {
            let mut file = File::create(&staging)?;
            let n = io::copy(reader, &mut file);
            n.and_then(|n| file.flush().map(|_| n))
        };
        match written {
            Ok(n) => {
                fs::rename(&staging, &target)?;
                debug!(path = %path, bytes = n, "Stored file");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&staging);
                Err(e.into())
            }
        }
    }

    fn list_files(&self, prefix: &str) -> FileListing {
        let dir = self.full_path(prefix);
        if !dir.is_dir() {
            return Box::new(std::iter::empty());
        }

        let root = self.root.clone();
        let iter = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let rel = entry.path().strip_prefix(&root).ok()?;
                    let parts: Vec<_> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    Some(Ok(parts.join("/")))
                }
                Ok(_) => None,
                Err(e) => Some(Err(StorageError::Io(e.into()))),
            });
        Box::new(iter)
    }

    fn can_list_files(&self) -> bool {
        true
    }
}
