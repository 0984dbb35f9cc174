//! Persistent storage backed by a single JSON file.
//!
//! The whole map is kept in memory and rewritten on every mutation through a
//! temporary file followed by a rename, so a crash mid-write leaves the
//! previous contents intact.

use crate::storage::{Result, Storage, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// JSON-file storage.
pub struct JsonFileStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory view, also serializes writers.
    items: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Open the store at `path`, loading existing contents.
    ///
    /// A missing file is an empty store. A file that does not parse is
    /// reported as [`StorageError::Corrupt`] rather than silently replaced.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = Self::load(&path).await?;
        info!("Opened store {:?} ({} entries)", path, items.len());
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    async fn save(&self, items: &BTreeMap<String, String>) -> Result<()> {
        let io = |e: std::io::Error| StorageError::Io(format!("{}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(io)?;
            }
        }

        let contents = serde_json::to_string_pretty(items)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).await.map_err(io)?;
        fs::rename(&tmp, &self.path).await.map_err(io)?;
        debug!("Saved {} entries to {:?}", items.len(), self.path);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn list(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.items.lock().await.clone())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn assign(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        next.insert(key.to_string(), value.to_string());
        self.save(&next).await?;
        *items = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        if !items.contains_key(key) {
            return Ok(());
        }
        let mut next = items.clone();
        next.remove(key);
        self.save(&next).await?;
        *items = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::open(temp_dir.path().join("store.json"))
            .await
            .unwrap();
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta/store.json");

        // First session: write entries
        {
            let storage = JsonFileStorage::open(&path).await.unwrap();
            storage.assign("metadata/a", "{}").await.unwrap();
            storage.assign("metadata/b", "{}").await.unwrap();
            storage.delete("metadata/a").await.unwrap();
        }

        assert!(path.exists());

        // Second session: load entries
        {
            let storage = JsonFileStorage::open(&path).await.unwrap();
            let all = storage.list().await.unwrap();
            assert_eq!(all.len(), 1);
            assert!(all.contains_key("metadata/b"));
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        match JsonFileStorage::open(&path).await {
            Err(StorageError::Corrupt(_)) => {}
            Err(other) => panic!("Expected Corrupt, got {:?}", other),
            Ok(_) => panic!("Expected Corrupt, got a store"),
        }
    }

    #[tokio::test]
    async fn test_write_failure_leaves_view_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        // The store path is an existing directory, so the rename must fail.
        let path = temp_dir.path().join("taken");
        std::fs::create_dir_all(path.join("child")).unwrap();
        let storage = JsonFileStorage {
            path: path.clone(),
            items: Mutex::new(BTreeMap::new()),
        };

        let result = storage.assign("k", "v").await;
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(storage.get("k").await.unwrap().is_none());
    }
}
