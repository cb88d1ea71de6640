//! Content-addressable response cache.
//!
//! Responses are memoised in the key-value store under
//! `response_cache:<sha256>`. The key covers the (truncated) prompt, provider,
//! model, the last few history turns and any attached image, so a different
//! conversation tail never produces a false hit.

use std::sync::Arc;
use std::time::Duration;

use chat_core::storage::{read_json, write_json};
use chat_core::{ImageAttachment, KeyValueStore, PipelineConfig, ProviderKind, Turn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CACHE_KEY_PREFIX: &str = "response_cache:";

/// Prompt prefix length (chars) that participates in the key
pub const PROMPT_KEY_CHARS: usize = 200;
/// Number of trailing history turns that participate in the key
pub const HISTORY_KEY_TURNS: usize = 5;
/// Per-turn text prefix length (chars) in the history hash
pub const HISTORY_TURN_CHARS: usize = 100;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HIGH_WATER: usize = 120;
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Everything that identifies a request for caching purposes
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    pub prompt: &'a str,
    pub provider: ProviderKind,
    pub model: &'a str,
    pub history: &'a [Turn],
    pub image: Option<&'a ImageAttachment>,
}

/// A stored response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        age.num_milliseconds() > i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn image_hash(image: &ImageAttachment) -> String {
    hex::encode(Sha256::digest(image.data.as_bytes()))
}

fn history_hash(history: &[Turn]) -> String {
    let start = history.len().saturating_sub(HISTORY_KEY_TURNS);
    let mut hasher = Sha256::new();
    for turn in &history[start..] {
        hasher.update(turn.role.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(truncate_chars(&turn.text, HISTORY_TURN_CHARS).as_bytes());
        if let Some(image) = &turn.image {
            hasher.update(b"|");
            hasher.update(image_hash(image).as_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Derive the content key for a request.
pub fn cache_key(request: &CacheRequest<'_>) -> String {
    let history = history_hash(request.history);
    let mut hasher = Sha256::new();
    for part in [
        truncate_chars(request.prompt, PROMPT_KEY_CHARS),
        request.provider.as_str(),
        request.model,
        history.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(image) = request.image {
        hasher.update(image_hash(image).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Response cache over the shared key-value store.
///
/// Storage failures never surface: reads degrade to a miss and writes are
/// logged and dropped.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
    high_water: usize,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
            high_water: DEFAULT_HIGH_WATER,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &PipelineConfig) -> Self {
        Self::new(store)
            .with_ttl(config.cache_ttl())
            .with_limits(config.cache_high_water, config.cache_max_entries)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Maintenance starts once the count exceeds `high_water` and evicts
    /// down to `max_entries`.
    pub fn with_limits(mut self, high_water: usize, max_entries: usize) -> Self {
        self.high_water = high_water.max(max_entries);
        self.max_entries = max_entries;
        self
    }

    fn storage_key(key: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, key)
    }

    /// Cached response for `request`, if present and still valid.
    pub async fn get(&self, request: &CacheRequest<'_>) -> Option<String> {
        let key = Self::storage_key(&cache_key(request));

        let entry = match read_json::<CacheEntry>(self.store.as_ref(), &key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Dropping unreadable cache entry {}: {}", key, e);
                self.discard(&key).await;
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            log::debug!("Cache entry {} expired", key);
            self.discard(&key).await;
            return None;
        }

        if entry.provider != request.provider.as_str() || entry.model != request.model {
            log::debug!(
                "Cache entry {} belongs to {}/{}, discarding",
                key,
                entry.provider,
                entry.model
            );
            self.discard(&key).await;
            return None;
        }

        log::debug!("Cache hit for {}/{}", entry.provider, entry.model);
        Some(entry.response)
    }

    /// Store `response` for `request`, then run maintenance.
    pub async fn set(&self, request: &CacheRequest<'_>, response: &str, ttl: Option<Duration>) {
        let key = Self::storage_key(&cache_key(request));
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            response: response.to_string(),
            timestamp: Utc::now(),
            provider: request.provider.as_str().to_string(),
            model: request.model.to_string(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };

        if let Err(e) = write_json(self.store.as_ref(), &key, &entry).await {
            log::warn!("Failed to write cache entry {}: {}", key, e);
            return;
        }

        self.maintain().await;
    }

    /// Number of stored entries (expired ones included).
    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every cache entry. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let keys = self.keys().await;
        let mut removed = 0;
        for key in keys {
            if matches!(self.store.remove(&key).await, Ok(true)) {
                removed += 1;
            }
        }
        removed
    }

    async fn keys(&self) -> Vec<String> {
        match self.store.keys_with_prefix(CACHE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Failed to list cache entries: {}", e);
                Vec::new()
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            log::warn!("Failed to remove cache entry {}: {}", key, e);
        }
    }

    async fn maintain(&self) {
        let keys = self.keys().await;
        if keys.len() <= self.high_water {
            return;
        }

        let now = Utc::now();
        let mut live: Vec<(String, DateTime<Utc>)> = Vec::with_capacity(keys.len());
        let mut purged = 0usize;

        for key in keys {
            match read_json::<CacheEntry>(self.store.as_ref(), &key).await {
                Ok(Some(entry)) if !entry.is_expired(now) => live.push((key, entry.timestamp)),
                Ok(None) => {}
                _ => {
                    self.discard(&key).await;
                    purged += 1;
                }
            }
        }

        let mut evicted = 0usize;
        if live.len() > self.max_entries {
            live.sort_by_key(|(_, timestamp)| *timestamp);
            let excess = live.len() - self.max_entries;
            for (key, _) in live.drain(..excess) {
                self.discard(&key).await;
                evicted += 1;
            }
        }

        log::info!(
            "Cache maintenance: purged {} expired, evicted {} oldest, {} remain",
            purged,
            evicted,
            live.len()
        );
    }
}
