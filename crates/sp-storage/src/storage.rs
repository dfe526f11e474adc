//! JSON file persistence
//!
//! One file per key in a `.storage/` directory, each wrapped in a versioned
//! envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::service::{validate_key, PersistenceService};

/// Envelope version written by this crate
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Storage file wrapper with version tracking
///
/// JSON format:
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "autosave.01J9Z3Q6V1",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version - breaking changes
    pub version: u32,
    /// Minor version - additive changes
    pub minor_version: u32,
    /// Storage key (file name)
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T) -> Self {
        Self {
            version: STORAGE_VERSION,
            minor_version: STORAGE_MINOR_VERSION,
            key: key.into(),
            data,
        }
    }
}

/// File-backed persistence rooted at `<dir>/.storage`
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a store under `base_dir/.storage`
    ///
    /// The directory is created on first save.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: base_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Get the file path for a storage key
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    async fn ensure_dir(&self) -> StorageResult<()> {
        if !fs::try_exists(&self.storage_dir).await? {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!("Created storage directory: {:?}", self.storage_dir);
        }
        Ok(())
    }

    /// Read the full envelope for a key
    pub async fn load_file(&self, key: &str) -> StorageResult<Option<StorageFile<Value>>> {
        validate_key(key)?;
        let path = self.file_path(key);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file not found: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let storage_file: StorageFile<Value> = serde_json::from_str(&content)?;
        if storage_file.version > STORAGE_VERSION {
            return Err(StorageError::VersionMismatch {
                key: key.to_string(),
                expected: STORAGE_VERSION,
                found: storage_file.version,
            });
        }

        debug!(
            "Loaded storage file: {} (v{}.{})",
            key, storage_file.version, storage_file.minor_version
        );
        Ok(Some(storage_file))
    }

    /// Load a key, returning an error if it is missing
    pub async fn load_required(&self, key: &str) -> StorageResult<Value> {
        self.load(key).await?.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl PersistenceService for Storage {
    /// Writes to a temp file first, then renames over the target
    async fn save(&self, key: &str, data: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.ensure_dir().await?;

        let path = self.file_path(key);
        let temp_path = self.file_path(&format!("{}.tmp", key));

        let storage_file = StorageFile::new(key, data);
        let content = serde_json::to_string_pretty(&storage_file)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "Saved storage file: {} (v{}.{})",
            key, storage_file.version, storage_file.minor_version
        );
        Ok(())
    }

    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.load_file(key).await?.map(|file| file.data))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {
                debug!("Deleted storage file: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.storage_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(file_type) = entry.file_type().await {
                if file_type.is_file() {
                    if let Some(name) = entry.file_name().to_str() {
                        // Skip temp files from interrupted writes
                        if !name.ends_with(".tmp") {
                            keys.push(name.to_string());
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
