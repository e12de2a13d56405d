//! Client-local key-value storage for the persisted session.
//!
//! DESIGN
//! ======
//! The controller treats storage as an opaque string map: `get`, `set`, and a
//! `clear` that wipes every key. [`FileStore`] keeps the map in one JSON file
//! and rewrites it through a temp file + rename so a crash never leaves a
//! half-written store behind. [`MemoryStore`] backs tests and ephemeral runs.
//!
//! ERROR HANDLING
//! ==============
//! A store file that cannot be parsed reads as empty; callers treat that the
//! same as "no session". Write failures are returned so the caller can log.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which the serialized session record lives.
pub const SESSION_KEY: &str = "session_user";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque string map persisted on the client.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns a [`StoreError`] if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove every key.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the wipe could not be persisted.
    fn clear(&self) -> Result<(), StoreError>;
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries().clear();
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// JSON-object file store. Every mutation rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> BTreeMap<String, String> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read store; treating as empty");
                return BTreeMap::new();
            }
        };
        serde_json::from_slice(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "store file is not a JSON object; treating as empty");
            BTreeMap::new()
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp_path = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, bytes).map_err(io_err)?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(e));
        }
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.guard();
        self.read_map().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut map = self.read_map();
        map.insert(key.to_owned(), value.to_owned());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.guard();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: self.path.clone(), source }),
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
