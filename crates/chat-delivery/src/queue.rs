//! Durable outbound queue with bounded retries.
//!
//! The queue index (`message_queue`) holds every [`QueuedMessage`]; the send
//! parameters of each item live apart under `queue_item:<id>` so the index
//! stays small when images are attached. Every status change is written
//! before it is broadcast as a [`QueueEvent`].

use std::sync::Arc;

use chat_core::storage::{read_json, write_json};
use chat_core::{
    KeyValueStore, Message, PipelineConfig, ProviderKind, QueueStatus, QueuedMessage,
    QueuedSendParams, SecretError, SecretStore, StorageError, Turn,
};
use chat_llm::{ContextTrimmer, GenerateRequest, LLMError, ProviderAdapter};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::connectivity::ConnectivityProbe;
use crate::events::{QueueEvent, QueueEventBus};
use crate::store::{ConversationStore, StoreError};
use crate::validation::validate_outbound;

pub const QUEUE_INDEX_KEY: &str = "message_queue";
pub const QUEUE_ITEM_PREFIX: &str = "queue_item:";

const RETRIES_EXHAUSTED: &str = "Maximum retries exceeded";
const INTERRUPTED: &str = "Delivery interrupted";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Message rejected: {0}")]
    Rejected(#[from] LLMError),

    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items handed to the provider
    pub attempted: usize,
    pub sent: usize,
    /// Items put back to `pending` for a later pass
    pub retried: usize,
    pub failed: usize,
    /// The pass was skipped because the probe reported offline
    pub offline: bool,
}

/// Why a single delivery attempt failed
#[derive(Error, Debug)]
enum AttemptError {
    #[error("{0}")]
    Provider(#[from] LLMError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Secret(#[from] SecretError),

    #[error("Send parameters missing for queued message {0}")]
    MissingParams(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Provider(e) => e.is_retryable(),
            AttemptError::Store(StoreError::Storage(_) | StoreError::Conflict { .. }) => true,
            AttemptError::Store(_) => false,
            AttemptError::Secret(SecretError::Storage(_)) => true,
            AttemptError::Secret(_) => false,
            AttemptError::MissingParams(_) => false,
        }
    }
}

pub struct MessageQueue {
    store: Arc<dyn KeyValueStore>,
    conversations: Arc<ConversationStore>,
    adapter: Arc<ProviderAdapter>,
    secrets: Arc<dyn SecretStore>,
    probe: Arc<dyn ConnectivityProbe>,
    trimmer: ContextTrimmer,
    config: PipelineConfig,
    events: QueueEventBus,
    /// Serialises read-modify-write of the queue index
    index_lock: Mutex<()>,
    /// Only one drain pass runs at a time
    drain_lock: Mutex<()>,
}

impl MessageQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        conversations: Arc<ConversationStore>,
        adapter: Arc<ProviderAdapter>,
        secrets: Arc<dyn SecretStore>,
        probe: Arc<dyn ConnectivityProbe>,
        trimmer: ContextTrimmer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            conversations,
            adapter,
            secrets,
            probe,
            trimmer,
            config,
            events: QueueEventBus::default(),
            index_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn params_key(id: &str) -> String {
        format!("{}{}", QUEUE_ITEM_PREFIX, id)
    }

    async fn load_items(&self) -> Result<Vec<QueuedMessage>> {
        match read_json::<Vec<QueuedMessage>>(self.store.as_ref(), QUEUE_INDEX_KEY).await {
            Ok(items) => Ok(items.unwrap_or_default()),
            Err(StorageError::Serialization(e)) => {
                log::warn!("Queue index is malformed, treating it as empty: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_items(&self, items: &[QueuedMessage]) -> Result<()> {
        write_json(self.store.as_ref(), QUEUE_INDEX_KEY, items).await?;
        Ok(())
    }

    /// Apply `f` to one item under the index lock and persist it.
    ///
    /// Returns the updated item, or `None` when it no longer exists.
    async fn update_item<F>(&self, id: &str, f: F) -> Result<Option<QueuedMessage>>
    where
        F: FnOnce(&mut QueuedMessage),
    {
        let updated = {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            let Some(item) = items.iter_mut().find(|i| i.id == id) else {
                return Ok(None);
            };
            f(item);
            let updated = item.clone();
            self.save_items(&items).await?;
            updated
        };
        self.emit_status(&updated);
        Ok(Some(updated))
    }

    fn emit_status(&self, item: &QueuedMessage) {
        self.events.emit(QueueEvent::StatusChanged {
            id: item.id.clone(),
            status: item.status,
            retry_count: item.retry_count,
            error: item.error.clone(),
        });
    }

    /// Validate and persist a message for background delivery.
    pub async fn enqueue(
        &self,
        conversation_id: &str,
        text: &str,
        params: QueuedSendParams,
    ) -> Result<QueuedMessage> {
        let provider: ProviderKind = params.provider.parse().map_err(LLMError::from)?;
        validate_outbound(
            text,
            provider,
            &params.model,
            params.image.as_ref(),
            &self.config,
            self.trimmer.limits(),
        )?;

        let item = QueuedMessage::new(conversation_id, Message::user(text), self.config.max_retries);
        write_json(self.store.as_ref(), &Self::params_key(&item.id), &params).await?;
        {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            items.push(item.clone());
            self.save_items(&items).await?;
        }

        log::info!(
            "Queued message {} for conversation {} via {}",
            item.id,
            conversation_id,
            provider
        );
        self.events.emit(QueueEvent::Enqueued {
            id: item.id.clone(),
            conversation_id: conversation_id.to_string(),
        });
        Ok(item)
    }

    pub async fn items(&self) -> Result<Vec<QueuedMessage>> {
        self.load_items().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedMessage>> {
        Ok(self.load_items().await?.into_iter().find(|i| i.id == id))
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.count(QueueStatus::Pending).await
    }

    pub async fn failed_count(&self) -> Result<usize> {
        self.count(QueueStatus::Failed).await
    }

    async fn count(&self, status: QueueStatus) -> Result<usize> {
        Ok(self
            .load_items()
            .await?
            .iter()
            .filter(|i| i.status == status)
            .count())
    }

    /// Drop an item and its send parameters.
    pub async fn remove(&self, id: &str) -> Result<()> {
        {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            let before = items.len();
            items.retain(|i| i.id != id);
            if items.len() == before {
                return Err(QueueError::NotFound(id.to_string()));
            }
            self.save_items(&items).await?;
        }
        self.store.remove(&Self::params_key(id)).await?;
        self.events.emit(QueueEvent::Removed { id: id.to_string() });
        Ok(())
    }

    /// Reset every failed item to `pending` with a fresh retry budget.
    pub async fn retry_failed(&self) -> Result<usize> {
        let reset: Vec<QueuedMessage> = {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            let mut reset = Vec::new();
            for item in items.iter_mut().filter(|i| i.status == QueueStatus::Failed) {
                item.status = QueueStatus::Pending;
                item.retry_count = 0;
                item.error = None;
                item.next_attempt_at = None;
                reset.push(item.clone());
            }
            if !reset.is_empty() {
                self.save_items(&items).await?;
            }
            reset
        };

        if !reset.is_empty() {
            log::info!("Retrying {} failed message(s)", reset.len());
        }
        for item in &reset {
            self.emit_status(item);
        }
        Ok(reset.len())
    }

    /// Return items left in `sending` by an interrupted pass to `pending`.
    ///
    /// The interrupted attempt counts against the item's retries, so an item
    /// that keeps crashing its pass ends up `failed` instead of looping.
    /// Waits for a pass in flight, so nothing it is still sending is touched.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let _drain = self.drain_lock.lock().await;
        let recovered: Vec<QueuedMessage> = {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            let mut recovered = Vec::new();
            for item in items.iter_mut().filter(|i| i.status == QueueStatus::Sending) {
                item.retry_count += 1;
                item.error = Some(INTERRUPTED.to_string());
                item.next_attempt_at = None;
                item.status = if item.retries_exhausted() {
                    QueueStatus::Failed
                } else {
                    QueueStatus::Pending
                };
                recovered.push(item.clone());
            }
            if !recovered.is_empty() {
                self.save_items(&items).await?;
            }
            recovered
        };

        for item in &recovered {
            log::warn!(
                "Recovered interrupted delivery of queued message {} as {:?}",
                item.id,
                item.status
            );
            self.emit_status(item);
        }
        Ok(recovered.len())
    }

    /// One drain pass over the due `pending` items.
    ///
    /// Provider failures never surface here; they are recorded on the item.
    /// Only storage failures of the queue itself are returned.
    pub async fn process_pending(&self) -> Result<DrainSummary> {
        let Ok(_drain) = self.drain_lock.try_lock() else {
            log::debug!("Drain pass already running, skipping");
            return Ok(DrainSummary::default());
        };

        let now = Utc::now();
        let due: Vec<QueuedMessage> = self
            .load_items()
            .await?
            .into_iter()
            .filter(|i| i.status == QueueStatus::Pending && i.is_due(now))
            .collect();

        let mut summary = DrainSummary::default();
        if due.is_empty() {
            return Ok(summary);
        }
        if !self.probe.is_online().await {
            log::info!("Offline, leaving {} queued message(s) pending", due.len());
            summary.offline = true;
            return Ok(summary);
        }

        for item in due {
            if item.retries_exhausted() {
                self.update_item(&item.id, |i| {
                    i.status = QueueStatus::Failed;
                    i.error.get_or_insert_with(|| RETRIES_EXHAUSTED.to_string());
                })
                .await?;
                summary.failed += 1;
                continue;
            }

            let Some(item) = self
                .update_item(&item.id, |i| i.status = QueueStatus::Sending)
                .await?
            else {
                continue;
            };
            summary.attempted += 1;

            match self.deliver(&item).await {
                Ok(assistant_message_id) => {
                    self.complete(&item, assistant_message_id).await?;
                    summary.sent += 1;
                }
                Err(e) => {
                    let updated = self.record_failure(&item, &e).await?;
                    match updated.map(|i| i.status) {
                        Some(QueueStatus::Failed) => summary.failed += 1,
                        Some(_) => summary.retried += 1,
                        None => {}
                    }
                }
            }
        }

        log::debug!("Drain pass finished: {:?}", summary);
        Ok(summary)
    }

    /// Send one item and append the exchange to its conversation.
    ///
    /// Returns the id of the appended assistant message.
    async fn deliver(&self, item: &QueuedMessage) -> std::result::Result<String, AttemptError> {
        let params: QueuedSendParams = read_json(self.store.as_ref(), &Self::params_key(&item.id))
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| AttemptError::MissingParams(item.id.clone()))?;
        let provider: ProviderKind = params.provider.parse().map_err(LLMError::from)?;

        let api_key = self
            .secrets
            .api_key(provider)
            .await?
            .ok_or_else(|| LLMError::Auth(format!("No API key configured for {}", provider)))?;

        let history: Vec<Turn> = self
            .conversations
            .load(&item.conversation_id)
            .await?
            .map(|c| c.messages.iter().map(Message::to_turn).collect())
            .unwrap_or_default();
        let history = self.trimmer.trim(
            &history,
            &item.message.text,
            provider,
            params.image.as_ref(),
        );

        let request = GenerateRequest {
            provider,
            model: params.model.clone(),
            prompt: item.message.text.clone(),
            api_key,
            history,
            image: params.image.clone(),
        };
        let text = self.adapter.generate(&request).await?;

        let mut user = item.message.clone();
        user.image = params.image.clone();
        let reply = Message::assistant(text, provider.as_str());
        let reply_id = reply.id.clone();
        self.conversations
            .mutate_or_create(&item.conversation_id, provider.as_str(), &params.model, |c| {
                c.add_message(user);
                c.add_message(reply);
                Ok(())
            })
            .await?;
        Ok(reply_id)
    }

    async fn complete(&self, item: &QueuedMessage, assistant_message_id: String) -> Result<()> {
        {
            let _guard = self.index_lock.lock().await;
            let mut items = self.load_items().await?;
            items.retain(|i| i.id != item.id);
            self.save_items(&items).await?;
        }
        self.store.remove(&Self::params_key(&item.id)).await?;

        log::info!(
            "Delivered queued message {} to conversation {}",
            item.id,
            item.conversation_id
        );
        self.events.emit(QueueEvent::Sent {
            id: item.id.clone(),
            conversation_id: item.conversation_id.clone(),
            assistant_message_id,
        });
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &QueuedMessage,
        error: &AttemptError,
    ) -> Result<Option<QueuedMessage>> {
        let retryable = error.is_retryable();
        let retry_delay = self.config.retry_delay();
        let message = error.to_string();

        let updated = self
            .update_item(&item.id, |i| {
                i.retry_count += 1;
                i.error = Some(message.clone());
                if !retryable || i.retries_exhausted() {
                    i.status = QueueStatus::Failed;
                    i.next_attempt_at = None;
                } else {
                    i.status = QueueStatus::Pending;
                    let delay = retry_delay * i.retry_count;
                    i.next_attempt_at = chrono::Duration::from_std(delay)
                        .ok()
                        .map(|d| Utc::now() + d);
                }
            })
            .await?;

        if let Some(updated) = &updated {
            if updated.status == QueueStatus::Failed {
                log::warn!(
                    "Queued message {} failed after {} attempt(s): {}",
                    updated.id,
                    updated.retry_count,
                    message
                );
            } else {
                log::info!(
                    "Queued message {} attempt {} failed, retrying: {}",
                    updated.id,
                    updated.retry_count,
                    message
                );
            }
        }
        Ok(updated)
    }
}
