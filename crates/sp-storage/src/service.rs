//! The persistence seam the engine depends on

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};

/// Key/value store for JSON documents
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Store `data` under `key`, replacing any previous value
    async fn save(&self, key: &str, data: Value) -> StorageResult<()>;

    /// Fetch the value stored under `key`, or None if there is none
    async fn load(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All stored keys, sorted
    async fn list_keys(&self) -> StorageResult<Vec<String>>;
}

/// Shared handle to a persistence service
pub type SharedPersistence = Arc<dyn PersistenceService>;

/// Serialize `value` and save it under `key`
pub async fn save_as<T>(service: &dyn PersistenceService, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let data = serde_json::to_value(value)?;
    service.save(key, data).await
}

/// Load the value under `key` and deserialize it
pub async fn load_as<T>(service: &dyn PersistenceService, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match service.load(key).await? {
        Some(data) => Ok(Some(serde_json::from_value(data)?)),
        None => Ok(None),
    }
}

/// Reject keys that would escape the storage namespace
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.contains('/') || key.contains('\\') {
        Some("key contains a path separator")
    } else if key.starts_with('.') {
        Some("key starts with a dot")
    } else if key.ends_with(".tmp") {
        Some("key uses the reserved .tmp suffix")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Bookmark {
        script: String,
        line: usize,
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let storage = MemoryStorage::new();
        let bookmark = Bookmark {
            script: "intro".to_string(),
            line: 7,
        };

        save_as(&storage, "bookmark", &bookmark).await.unwrap();
        let loaded: Option<Bookmark> = load_as(&storage, "bookmark").await.unwrap();
        assert_eq!(loaded, Some(bookmark));

        let missing: Option<Bookmark> = load_as(&storage, "other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_load_as_wrong_shape() {
        let storage = MemoryStorage::new();
        storage.save("bookmark", serde_json::json!("not a bookmark")).await.unwrap();

        let result: StorageResult<Option<Bookmark>> = load_as(&storage, "bookmark").await;
        assert!(matches!(result, Err(StorageError::Json(_))));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("autosave.01HZX").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("half.tmp").is_err());
    }
}
