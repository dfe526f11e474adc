//! In-memory persistence

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::StorageResult;
use crate::service::{validate_key, PersistenceService};

/// In-memory key/value store
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with initial data
    pub fn with_data(initial: HashMap<String, Value>) -> Self {
        Self {
            data: Arc::new(RwLock::new(initial)),
        }
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all stored data
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
    }
}

#[async_trait]
impl PersistenceService for MemoryStorage {
    async fn save(&self, key: &str, data: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.data.write().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.data.read().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = MemoryStorage::new();

        storage.save("slot1", json!({"cursor": 3})).await.unwrap();

        let value = storage.load("slot1").await.unwrap().unwrap();
        assert_eq!(value["cursor"], 3);
        assert!(storage.load("slot2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_initial_data() {
        let initial = HashMap::from([
            ("b".to_string(), json!(2)),
            ("a".to_string(), json!(1)),
        ]);

        let storage = MemoryStorage::with_data(initial);

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.list_keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        storage.save("shared", json!(true)).await.unwrap();
        assert!(other.contains("shared"));

        other.delete("shared").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_key() {
        let storage = MemoryStorage::new();
        assert!(storage.save("a/b", json!(null)).await.is_err());
    }
}
