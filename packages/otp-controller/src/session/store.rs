//! Key/value persistence for the session record.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};

use crate::kernel::BaseSessionStore;

/// Well-known key the session record lives under.
pub const STORAGE_KEY: &str = "auth";

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BaseSessionStore for FileSessionStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        // Readers never observe a partially written record.
        let path = self.path(key);
        let staging = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&staging, value)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Process-local store for tests and hosts without a disk.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, e.g. a record left by a previous run.
    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.values().insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BaseSessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_replaces_record_and_handles_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested"));

        assert_eq!(store.load(STORAGE_KEY).unwrap(), None);

        store.save(STORAGE_KEY, r#"{"token":"t1"}"#).unwrap();
        assert_eq!(
            store.load(STORAGE_KEY).unwrap().as_deref(),
            Some(r#"{"token":"t1"}"#)
        );
        assert!(dir.path().join("nested").join("auth.json").exists());

        store.save(STORAGE_KEY, r#"{"token":null}"#).unwrap();
        assert_eq!(
            store.load(STORAGE_KEY).unwrap().as_deref(),
            Some(r#"{"token":null}"#)
        );
        assert!(!dir.path().join("nested").join(".auth.json.tmp").exists());
    }

    #[test]
    fn test_file_store_reports_unreadable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the record file should be.
        fs::create_dir_all(dir.path().join("auth.json")).unwrap();
        let store = FileSessionStore::new(dir.path());

        assert!(store.load(STORAGE_KEY).is_err());
    }

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemorySessionStore::new().with_value(STORAGE_KEY, "a");
        store.save(STORAGE_KEY, "b").unwrap();
        assert_eq!(store.get(STORAGE_KEY).as_deref(), Some("b"));
    }
}
