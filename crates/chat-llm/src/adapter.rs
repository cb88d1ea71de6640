//! Uniform entry point over the provider backends.
//!
//! [`ProviderAdapter::generate`] validates the request, gates images on the
//! model's capabilities, consults the response cache and only then reaches
//! the backend. [`ProviderAdapter::stream`] replays a full completion as
//! word chunks; it is not transport-level streaming.

use std::sync::Arc;
use std::time::Duration;

use chat_core::{ImageAttachment, ProviderKind, Turn};
use tokio::sync::mpsc;

use crate::cache::{CacheRequest, ResponseCache};
use crate::models::supports_vision;
use crate::provider::{LLMError, LLMProvider, Result};
use crate::registry::ProviderRegistry;

pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(30);

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub provider: ProviderKind,
    pub model: String,
    pub prompt: String,
    pub api_key: String,
    /// Prior turns, oldest first, already trimmed to the budget
    pub history: Vec<Turn>,
    pub image: Option<ImageAttachment>,
}

/// Callbacks of the streaming shim, delivered over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Complete(String),
    Error(String),
}

pub struct ProviderAdapter {
    registry: Arc<ProviderRegistry>,
    cache: ResponseCache,
    chunk_delay: Duration,
}

impl ProviderAdapter {
    pub fn new(registry: Arc<ProviderRegistry>, cache: ResponseCache) -> Self {
        Self {
            registry,
            cache,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Produce a completion for `request`, from the cache when possible.
    ///
    /// No retries happen here; transient failures are reported through
    /// [`LLMError::is_retryable`] for the caller to act on.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(LLMError::Validation("Message text must not be empty".to_string()));
        }
        if request.api_key.trim().is_empty() {
            return Err(LLMError::Auth(format!(
                "No API key configured for {}",
                request.provider
            )));
        }

        let vision = supports_vision(request.provider, &request.model);
        if request.image.is_some() && !vision {
            return Err(LLMError::UnsupportedModality {
                model: request.model.clone(),
            });
        }

        let history: Vec<Turn> = if vision {
            request.history.clone()
        } else {
            let stripped = request.history.iter().filter(|t| t.image.is_some()).count();
            if stripped > 0 {
                log::debug!(
                    "Stripping {} image(s) from history for text-only model {}",
                    stripped,
                    request.model
                );
            }
            request.history.iter().map(Turn::without_image).collect()
        };

        let cache_request = CacheRequest {
            prompt: &request.prompt,
            provider: request.provider,
            model: &request.model,
            history: &history,
            image: request.image.as_ref(),
        };

        if let Some(cached) = self.cache.get(&cache_request).await {
            log::info!("Serving {} response from cache", request.provider);
            return Ok(cached);
        }

        let backend = self.registry.get(request.provider, &request.api_key)?;

        let mut turns = history.clone();
        let mut prompt_turn = Turn::user(request.prompt.clone());
        prompt_turn.image = request.image.clone();
        turns.push(prompt_turn);

        let text = backend.complete(&turns, Some(&request.model)).await?;
        if text.trim().is_empty() {
            return Err(LLMError::EmptyResponse(request.provider.to_string()));
        }

        self.cache.set(&cache_request, &text, None).await;
        Ok(text)
    }

    /// Chunking shim over [`generate`](Self::generate).
    ///
    /// Sends each whitespace-separated word as a [`StreamEvent::Chunk`] with
    /// a fixed delay between chunks, then [`StreamEvent::Complete`]. On
    /// failure a [`StreamEvent::Error`] is sent and the error returned. A
    /// dropped receiver does not abort the call.
    pub async fn stream(
        &self,
        request: &GenerateRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String> {
        let text = match self.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                let _ = events.send(StreamEvent::Error(e.to_string())).await;
                return Err(e);
            }
        };

        let words: Vec<&str> = text.split_whitespace().collect();
        let last = words.len().saturating_sub(1);
        for (index, word) in words.iter().enumerate() {
            if index > 0 && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            let chunk = if index < last {
                format!("{} ", word)
            } else {
                word.to_string()
            };
            if events.send(StreamEvent::Chunk(chunk)).await.is_err() {
                log::debug!("Stream receiver dropped, finishing silently");
                return Ok(text);
            }
        }

        let _ = events.send(StreamEvent::Complete(text.clone())).await;
        Ok(text)
    }
}
