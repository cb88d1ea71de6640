//! Key-value persistence seam.
//!
//! Every pipeline record is stored as a JSON document under a string key.
//! Components never share live references to records; they read, mutate
//! and write whole documents through this trait.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw document stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Create or overwrite the document under `key`
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;

    /// Remove `key`. Returns whether anything was removed.
    async fn remove(&self, key: &str) -> StorageResult<bool>;

    /// List keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Read and decode a JSON document.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON document.
pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let json = serde_json::to_string(value)?;
    store.set(key, json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        let record = Record {
            name: "a".to_string(),
            count: 2,
        };
        write_json(&store, "record:a", &record).await.unwrap();

        let loaded: Option<Record> = read_json(&store, "record:a").await.unwrap();
        assert_eq!(loaded, Some(record));

        let missing: Option<Record> = read_json(&store, "record:b").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_read_json_reports_malformed_documents() {
        let store = MemoryStore::new();
        store.set("record:bad", "{not json".to_string()).await.unwrap();

        let result: StorageResult<Option<Record>> = read_json(&store, "record:bad").await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }
}
