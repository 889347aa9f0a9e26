//! Device-local key-value persistence
//!
//! Holds state that belongs to this device only: its identifier, the
//! display name, queued comments and cached topic marks.

use crate::StoreError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Key-value store surviving process restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// JSON helpers over any key-value store
pub trait KeyValueExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?;
        self.set(key, &raw)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueExt for S {}

/// Volatile key-value store
#[derive(Default)]
pub struct MemoryKv {
    data: DashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }
}

/// Key-value store kept in a single JSON file.
///
/// The whole map is rewritten on every change through a temporary file and
/// a rename, so a crash leaves either the old or the new contents.
pub struct FileKv {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    /// Open (or start) the file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(data)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("{}: {}", dir.display(), e)))?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw).map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        data.insert(key.to_string(), value.to_string());
        self.persist(&data)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_kv() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("deviceId").unwrap(), None);
        kv.set("deviceId", "abc").unwrap();
        assert_eq!(kv.get("deviceId").unwrap().as_deref(), Some("abc"));
        kv.remove("deviceId").unwrap();
        assert_eq!(kv.get("deviceId").unwrap(), None);
    }

    #[test]
    fn test_json_helpers_through_trait_object() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
        kv.set_json("favoriteTopics", &vec!["t1", "t2"]).unwrap();
        let ids: Vec<String> = kv.get_json("favoriteTopics").unwrap().unwrap();
        assert_eq!(ids, vec!["t1", "t2"]);

        kv.set("broken", "{not json").unwrap();
        assert!(kv.get_json::<Vec<String>>("broken").is_err());
    }

    #[test]
    fn test_file_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        {
            let kv = FileKv::open(&path).unwrap();
            kv.set("username", "alice").unwrap();
            kv.set("deviceId", "d1").unwrap();
            kv.remove("deviceId").unwrap();
        }

        let kv = FileKv::open(&path).unwrap();
        assert_eq!(kv.get("username").unwrap().as_deref(), Some("alice"));
        assert_eq!(kv.get("deviceId").unwrap(), None);
    }

    #[test]
    fn test_file_kv_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(FileKv::open(&path), Err(StoreError::Serialization(_))));
    }
}
