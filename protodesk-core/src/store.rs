//! # State Store
//!
//! Key/value persistence for projects. The engine only needs three operations and never
//! cares about the storage format, so any backend fits behind [`StateStore`].
use directories::ProjectDirs;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not determine a state directory")]
    NoStateDir,
    #[error("I/O error on '{path}': '{source}'")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Stored value for '{key}' is not valid JSON: '{source}'")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Key '{0}' cannot be used as a file name")]
    InvalidKey(String),
}

pub trait StateStore: Send + Sync {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Returns `None` when nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Stores each key as a pretty-printed `<key>.json` file inside one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(Self { dir })
    }

    /// Opens the store in the platform's data directory for protodesk.
    pub fn in_data_dir() -> Result<Self, StoreError> {
        let dirs =
            ProjectDirs::from("com", "protodesk", "protodesk").ok_or(StoreError::NoStateDir)?;
        Self::new(dirs.data_dir().join("projects"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StateStore for FileStore {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;

        fs::write(&path, content).map_err(|source| StoreError::Io { path, source })
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_store_round_trips_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let value = json!({ "id": "p1", "forms": [] });

        assert_eq!(store.load("p1").unwrap(), None);

        store.save("p1", &value).unwrap();
        assert_eq!(store.load("p1").unwrap(), Some(value));

        store.delete("p1").unwrap();
        store.delete("p1").unwrap();
        assert_eq!(store.load("p1").unwrap(), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let err = store.save("../escape", &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn corrupt_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        assert!(matches!(
            store.load("broken"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
