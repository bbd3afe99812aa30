//! In-memory backend for tests and dry runs.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

use parking_lot::Mutex;

use crate::backend::{dir_prefix, FileListing, ObjectRead, ObjectReader, StorageBackend};
use crate::error::{Result, StorageError};

/// Listable in-memory object store.
///
/// The `failing` variant stores and lists normally but every reader it hands
/// out errors after the first byte.
#[derive(Debug, Default)]
pub struct MockStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: bool,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            files: Mutex::default(),
            failing: true,
        }
    }

    /// Remove an object, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.files.lock().remove(path).is_some()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reader that yields one byte and then fails.
struct BrokenReader {
    data: Vec<u8>,
    served: bool,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.served && !buf.is_empty() && !self.data.is_empty() {
            self.served = true;
            buf[0] = self.data[0];
            return Ok(1);
        }
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock read failure"))
    }
}

impl ObjectRead for BrokenReader {}

impl StorageBackend for MockStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.files
            .lock()
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn get_file(&self, path: &str) -> Result<ObjectReader> {
        let data = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        if self.failing {
            return Ok(Box::new(BrokenReader { data, served: false }));
        }
        Ok(Box::new(Cursor::new(data)))
    }

    fn put_file(&self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.files.lock().insert(path.to_string(), data);
        Ok(())
    }

    fn list_files(&self, prefix: &str) -> FileListing {
        let dir = dir_prefix(prefix);
        let paths: Vec<Result<String>> = self
            .files
            .lock()
            .keys()
            .filter(|k| k.starts_with(&dir))
            .map(|k| Ok(k.clone()))
            .collect();
        Box::new(paths.into_iter())
    }

    fn can_list_files(&self) -> bool {
        true
    }
}
