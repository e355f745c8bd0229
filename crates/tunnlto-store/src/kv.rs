//! Key-Value Persistence
//!
//! The flat string-keyed store the tunnel store is built on. Values are
//! opaque strings; the tunnel store decides what goes in them.
//!
//! - [`MemoryStore`]: in-process map, used by tests and throwaway sessions
//! - [`FileStore`]: every key in one JSON file, rewritten atomically

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File holding every key of a [`FileStore`]
const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Error)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat string-keyed persistence primitive
pub trait KeyValueStore {
    /// Value under `key`, `None` if unset
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Replace the value under `key`
    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), KvError>;

    /// Every key currently set
    fn keys(&self) -> Result<Vec<String>, KvError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        (**self).keys()
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing entries
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// File-backed store.
///
/// The whole map lives in `storage.json` under the store directory. Each
/// mutation writes `storage.tmp` and renames it over the target, so a crash
/// leaves either the old or the new map on disk.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Open (or create) the store in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, KvError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let path = dir.join(STORAGE_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened key-value file {} ({} keys)", path.display(), entries.len());
        Ok(Self { dir, entries })
    }

    /// Path of the backing file
    pub fn path(&self) -> PathBuf {
        self.dir.join(STORAGE_FILE)
    }

    fn flush(&self) -> Result<(), KvError> {
        let path = self.path();
        let temp_path = path.with_extension("tmp");

        let payload = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&temp_path, payload)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries.get(key).cloned())
    }

    /// On a failed flush the previous value is restored
    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError> {
        let previous = self.entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush() {
            match previous {
                Some(previous) => self.entries.insert(key.to_string(), previous),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        let Some(previous) = self.entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush() {
            self.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.entries.keys().cloned().collect())
    }
}
