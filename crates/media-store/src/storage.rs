//! Storage trait abstraction for the key/value backing store.
//!
//! Implementations:
//! - `MemStorage` - in-process map, never fails
//! - `JsonFileStorage` (in `json_storage`) - whole map persisted to one JSON file
//!
//! Storage is record-type agnostic: keys and values are plain strings and all
//! typing happens in `Collection`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Minimal key/value contract.
///
/// Single-key operations are linearizable; nothing else is promised.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All entries, keyed by storage key.
    async fn list(&self) -> Result<BTreeMap<String, String>>;

    /// Value under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    async fn assign(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory storage, the reference implementation.
#[derive(Default)]
pub struct MemStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn list(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.items.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn assign(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

// Lets one store back several collections.
#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn list(&self) -> Result<BTreeMap<String, String>> {
        (**self).list().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn assign(&self, key: &str, value: &str) -> Result<()> {
        (**self).assign(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mem_storage_basic_operations() {
        let storage = MemStorage::new();

        storage.assign("a", "1").await.unwrap();
        storage.assign("b", "2").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(storage.len(), 2);

        storage.assign("a", "3").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("3"));

        storage.delete("a").await.unwrap();
        assert!(storage.get("a").await.unwrap().is_none());

        let all = storage.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_ok() {
        let storage = MemStorage::new();
        storage.delete("missing").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_shared_through_arc() {
        let storage = Arc::new(MemStorage::new());
        let shared: Arc<dyn Storage> = storage.clone();

        shared.assign("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
