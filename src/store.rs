//! Local key-value store holding the device's persisted records.
//!
//! The store contract is deliberately forgiving: reads return `None` on any
//! read or decode failure and writes report failure as `false`. Callers in the
//! core turn a `false` into [`crate::error::CoreError::Storage`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Persisted keys. These names are the on-disk schema.
pub mod keys {
    pub const USER: &str = "user";
    pub const ONBOARDED: &str = "onboarded";
    pub const SESSION: &str = "session";
    pub const MATCHES: &str = "matches";
    pub const SETTINGS: &str = "settings";
    pub const THEME_MODE: &str = "themeMode";
}

pub trait Store {
    fn get_item(&self, key: &str) -> Option<Value>;
    fn set_item(&self, key: &str, value: &Value) -> bool;
    fn remove_item(&self, key: &str) -> bool;
}

/// Typed access on top of [`Store`]. Decoding into `T` is the schema check.
pub trait StoreExt: Store {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_item(key)?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding record that failed schema check");
                None
            }
        }
    }

    fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set_item(key, &value),
            Err(err) => {
                tracing::error!(key, error = %err, "failed to encode record");
                false
            }
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// One JSON file per key in a directory
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn write(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get_item(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to read record");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "record is not valid JSON");
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &Value) -> bool {
        match self.write(key, value) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(key, error = %err, "failed to write record");
                false
            }
        }
    }

    fn remove_item(&self, key: &str) -> bool {
        let path = self.path_for(key);
        if !path.exists() {
            return true;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(key, error = %err, "failed to remove record");
                false
            }
        }
    }
}

#[cfg(test)]
use std::cell::{Cell, RefCell};
#[cfg(test)]
use std::collections::HashMap;

/// In-process store; writes can be made to fail
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RefCell<HashMap<String, Value>>,
    fail_writes: Cell<bool>,
    failing_key: RefCell<Option<String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Fail writes and removals of `key` only
    pub fn set_failing_key(&self, key: Option<&str>) {
        *self.failing_key.borrow_mut() = key.map(str::to_string);
    }

    fn write_fails(&self, key: &str) -> bool {
        self.fail_writes.get() || self.failing_key.borrow().as_deref() == Some(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.borrow().contains_key(key)
    }
}

#[cfg(test)]
impl Store for MemoryStore {
    fn get_item(&self, key: &str) -> Option<Value> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &Value) -> bool {
        if self.write_fails(key) {
            return false;
        }
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        true
    }

    fn remove_item(&self, key: &str) -> bool {
        if self.write_fails(key) {
            return false;
        }
        self.items.borrow_mut().remove(key);
        true
    }
}

/// Shared handle so a test can keep poking at a store owned by the app
impl<S: Store + ?Sized> Store for std::rc::Rc<S> {
    fn get_item(&self, key: &str) -> Option<Value> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &Value) -> bool {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> bool {
        (**self).remove_item(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_file_store_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = Record {
            name: "a".to_string(),
            count: 2,
        };

        assert!(store.set(keys::SETTINGS, &record));
        assert_eq!(store.get::<Record>(keys::SETTINGS), Some(record));
        assert!(dir.path().join("settings.json").exists());

        assert!(store.remove_item(keys::SETTINGS));
        assert!(store.get::<Record>(keys::SETTINGS).is_none());
        // Removing a missing key is not a failure
        assert!(store.remove_item(keys::SETTINGS));
    }

    #[test]
    fn test_file_store_corrupt_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("session.json"), "{not json").unwrap();
        assert!(store.get_item(keys::SESSION).is_none());
    }

    #[test]
    fn test_schema_mismatch_reads_as_absent() {
        let store = MemoryStore::new();
        store.set_item(keys::USER, &serde_json::json!({ "name": 7 }));
        assert!(store.get::<Record>(keys::USER).is_none());
    }

    #[test]
    fn test_null_reads_as_absent() {
        let store = MemoryStore::new();
        store.set_item(keys::SESSION, &Value::Null);
        assert!(store.get::<Record>(keys::SESSION).is_none());
    }

    #[test]
    fn test_memory_store_write_failure() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(!store.set(keys::ONBOARDED, &true));
        assert!(!store.remove_item(keys::ONBOARDED));
        assert!(!store.contains(keys::ONBOARDED));
    }
}
