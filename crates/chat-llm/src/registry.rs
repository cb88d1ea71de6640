//! Lazily constructed provider clients.
//!
//! A client is built the first time a (provider, API key) pair is used and
//! reused afterwards. Keys are never stored in the map; entries are keyed
//! by a short SHA-256 fingerprint.

use std::sync::Arc;

use chat_core::{Config, ProviderKind};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::provider::{LLMProvider, Result};
use crate::provider_factory::create_provider;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    kind: ProviderKind,
    fingerprint: String,
}

fn fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    hex::encode(&digest[..8])
}

pub struct ProviderRegistry {
    config: Arc<Config>,
    clients: DashMap<ClientKey, Arc<dyn LLMProvider>>,
    registered: DashMap<ProviderKind, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            registered: DashMap::new(),
        }
    }

    /// Use `provider` for every request to `kind`, whatever the API key.
    pub fn register(&self, kind: ProviderKind, provider: Arc<dyn LLMProvider>) {
        log::debug!("Registered custom {} backend", kind);
        self.registered.insert(kind, provider);
    }

    /// Client for `kind` authenticated with `api_key`, built on first use.
    pub fn get(&self, kind: ProviderKind, api_key: &str) -> Result<Arc<dyn LLMProvider>> {
        if let Some(provider) = self.registered.get(&kind) {
            return Ok(provider.value().clone());
        }

        let key = ClientKey {
            kind,
            fingerprint: fingerprint(api_key),
        };
        if let Some(provider) = self.clients.get(&key) {
            return Ok(provider.value().clone());
        }

        let provider = create_provider(kind, api_key, &self.config)?;
        let provider = self.clients.entry(key).or_insert(provider).value().clone();
        Ok(provider)
    }

    /// Number of lazily constructed clients.
    pub fn constructed(&self) -> usize {
        self.clients.len()
    }

    /// Drop cached clients, e.g. after the configuration changed.
    pub fn clear(&self) {
        self.clients.clear();
    }
}
