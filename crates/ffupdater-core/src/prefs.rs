//! Small key-value preference stores.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{Result, UpdaterError};

/// Key-value store for the little state the updater persists.
pub trait PreferenceStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_string(&self, key: &str, value: &str) -> Result<()>;
    fn get_i64(&self, key: &str) -> Option<i64>;
    fn put_i64(&self, key: &str, value: i64) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store; nothing survives the process.
#[derive(Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).and_then(Value::as_i64)
    }

    fn put_i64(&self, key: &str, value: i64) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object file, rewritten atomically on every change.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<HashMap<String, Value>>,
}

impl FilePreferences {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let raw = fs::read(&path)?;
            if raw.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, Value>)) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut values);
        persist(&self.path, &values)
    }
}

fn persist(path: &Path, values: &HashMap<String, Value>) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&serde_json::to_vec_pretty(values)?)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| UpdaterError::Io(err.error))?;
    Ok(())
}

impl PreferenceStore for FilePreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), Value::from(value));
        })
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).and_then(Value::as_i64)
    }

    fn put_i64(&self, key: &str, value: i64) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), Value::from(value));
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_keeps_types_apart() {
        let prefs = MemoryPreferences::new();
        prefs.put_string("name", "value").unwrap();
        prefs.put_i64("count", 42).unwrap();

        assert_eq!(prefs.get_string("name").as_deref(), Some("value"));
        assert_eq!(prefs.get_i64("count"), Some(42));
        assert_eq!(prefs.get_i64("name"), None);
        assert_eq!(prefs.get_string("count"), None);

        prefs.remove("name").unwrap();
        assert_eq!(prefs.get_string("name"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");

        let prefs = FilePreferences::open(&path).unwrap();
        prefs
            .put_string("device_app_register_FIREFOX_RELEASE_version_name", "2021-01-01T00:00:00Z")
            .unwrap();
        prefs.put_i64("download_metadata_LOCKWISE_created_epoch_ms", 7).unwrap();
        drop(prefs);

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(
            reopened
                .get_string("device_app_register_FIREFOX_RELEASE_version_name")
                .as_deref(),
            Some("2021-01-01T00:00:00Z")
        );
        assert_eq!(
            reopened.get_i64("download_metadata_LOCKWISE_created_epoch_ms"),
            Some(7)
        );

        reopened
            .remove("download_metadata_LOCKWISE_created_epoch_ms")
            .unwrap();
        let again = FilePreferences::open(&path).unwrap();
        assert_eq!(again.get_i64("download_metadata_LOCKWISE_created_epoch_ms"), None);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(FilePreferences::open(&path).is_err());
    }
}
