//! API key lookup.
//!
//! The pipeline resolves provider credentials through [`SecretStore`] at
//! send time, so queued items never persist keys alongside their payload.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::encryption;
use crate::provider::ProviderKind;
use crate::storage::{KeyValueStore, StorageError};

const SECRET_KEY_PREFIX: &str = "secret:";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Secret encryption error: {0}")]
    Crypto(String),

    #[error("Secret store is read-only")]
    ReadOnly,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// API key for a provider, `None` when not configured
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<String>, SecretError>;

    /// Store an API key for a provider
    async fn set_api_key(&self, provider: ProviderKind, key: &str) -> Result<(), SecretError>;
}

/// Keys taken from [`Config`] (config files + environment). Read-only.
#[derive(Debug, Clone)]
pub struct ConfigSecretStore {
    config: Arc<Config>,
}

impl ConfigSecretStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SecretStore for ConfigSecretStore {
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<String>, SecretError> {
        Ok(self.config.api_key(provider).map(str::to_string))
    }

    async fn set_api_key(&self, _provider: ProviderKind, _key: &str) -> Result<(), SecretError> {
        Err(SecretError::ReadOnly)
    }
}

/// In-memory keys (tests, embedding applications that manage keys themselves)
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    keys: RwLock<HashMap<ProviderKind, String>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(provider: ProviderKind, key: impl Into<String>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(provider, key.into());
        Self {
            keys: RwLock::new(keys),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<String>, SecretError> {
        Ok(self.keys.read().await.get(&provider).cloned())
    }

    async fn set_api_key(&self, provider: ProviderKind, key: &str) -> Result<(), SecretError> {
        self.keys.write().await.insert(provider, key.to_string());
        Ok(())
    }
}

/// AES-GCM encrypted keys persisted in the key-value store under `secret:<provider>`
pub struct EncryptedSecretStore {
    store: Arc<dyn KeyValueStore>,
    key: [u8; 32],
}

impl EncryptedSecretStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: [u8; 32]) -> Self {
        Self { store, key }
    }

    /// Use the key from `COURIER_SECRET_KEY`, or an ephemeral one
    pub fn from_env(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, encryption::encryption_key())
    }

    fn storage_key(provider: ProviderKind) -> String {
        format!("{}{}", SECRET_KEY_PREFIX, provider.as_str())
    }
}

#[async_trait]
impl SecretStore for EncryptedSecretStore {
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<String>, SecretError> {
        let Some(encrypted) = self.store.get(&Self::storage_key(provider)).await? else {
            return Ok(None);
        };
        match encryption::decrypt(&self.key, &encrypted) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                // Unreadable secrets behave as "not configured"
                log::warn!("Failed to decrypt stored {} API key: {}", provider, e);
                Ok(None)
            }
        }
    }

    async fn set_api_key(&self, provider: ProviderKind, key: &str) -> Result<(), SecretError> {
        let encrypted =
            encryption::encrypt(&self.key, key).map_err(|e| SecretError::Crypto(e.to_string()))?;
        self.store
            .set(&Self::storage_key(provider), encrypted)
            .await?;
        Ok(())
    }
}
