//! Send path composing the pipeline for UI handlers.
//!
//! Synchronous sends surface provider errors to the caller; queued sends
//! go through [`MessageQueue`] and only report through queue status.

use std::sync::Arc;

use chat_core::{
    Config, ImageAttachment, KeyValueStore, Message, PipelineConfig, ProviderKind,
    QueuedMessage, QueuedSendParams, Role, SecretError, SecretStore, Turn, VersionSwitch,
};
use chat_llm::{
    ContextLimits, ContextTrimmer, GenerateRequest, LLMError, ProviderAdapter, ProviderRegistry,
    ResponseCache, StreamEvent,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::connectivity::ConnectivityProbe;
use crate::queue::{MessageQueue, QueueError};
use crate::store::{ConversationStore, EditReply, StoreError};
use crate::validation::validate_outbound;
use crate::worker::{QueueWorker, QueueWorkerHandle};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub provider: String,
    pub model: String,
    pub text: String,
    pub image: Option<ImageAttachment>,
    /// Receives chunk events when set; otherwise the reply is generated in one go
    pub stream: Option<mpsc::Sender<StreamEvent>>,
}

impl SendRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            text: text.into(),
            image: None,
            stream: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_stream(mut self, events: mpsc::Sender<StreamEvent>) -> Self {
        self.stream = Some(events);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub conversation_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub text: String,
}

pub struct ChatService {
    conversations: Arc<ConversationStore>,
    adapter: Arc<ProviderAdapter>,
    secrets: Arc<dyn SecretStore>,
    queue: Arc<MessageQueue>,
    trimmer: ContextTrimmer,
    config: PipelineConfig,
}

impl ChatService {
    pub fn new(
        conversations: Arc<ConversationStore>,
        adapter: Arc<ProviderAdapter>,
        secrets: Arc<dyn SecretStore>,
        queue: Arc<MessageQueue>,
        trimmer: ContextTrimmer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            conversations,
            adapter,
            secrets,
            queue,
            trimmer,
            config,
        }
    }

    /// Wire the whole pipeline over one key-value store.
    pub fn from_config(
        config: Arc<Config>,
        store: Arc<dyn KeyValueStore>,
        secrets: Arc<dyn SecretStore>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let pipeline = config.pipeline.clone();
        let registry = Arc::new(ProviderRegistry::new(Arc::clone(&config)));
        let cache = ResponseCache::from_config(Arc::clone(&store), &pipeline);
        let adapter = Arc::new(
            ProviderAdapter::new(registry, cache).with_chunk_delay(pipeline.stream_chunk_delay()),
        );
        let trimmer = ContextTrimmer::new(ContextLimits::from_config(&config));
        let conversations = Arc::new(ConversationStore::new(Arc::clone(&store)));
        let queue = Arc::new(MessageQueue::new(
            store,
            Arc::clone(&conversations),
            Arc::clone(&adapter),
            Arc::clone(&secrets),
            probe,
            trimmer.clone(),
            pipeline.clone(),
        ));
        Self::new(conversations, adapter, secrets, queue, trimmer, pipeline)
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn adapter(&self) -> &Arc<ProviderAdapter> {
        &self.adapter
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Start draining the queue in the background.
    pub fn spawn_worker(&self) -> QueueWorkerHandle {
        QueueWorker::for_queue(Arc::clone(&self.queue)).spawn()
    }

    async fn api_key(&self, provider: ProviderKind) -> Result<String> {
        self.secrets
            .api_key(provider)
            .await?
            .ok_or_else(|| LLMError::Auth(format!("No API key configured for {}", provider)).into())
    }

    /// Send `request` and append the exchange to the conversation.
    ///
    /// Without `conversation_id` a new conversation is started. A
    /// conversation id that does not exist yet is created on first append.
    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        request: SendRequest,
    ) -> Result<SendOutcome> {
        let provider: ProviderKind = request.provider.parse().map_err(LLMError::from)?;
        validate_outbound(
            &request.text,
            provider,
            &request.model,
            request.image.as_ref(),
            &self.config,
            self.trimmer.limits(),
        )?;
        let api_key = self.api_key(provider).await?;

        let (conversation_id, history) = match conversation_id {
            Some(id) => {
                let history = self
                    .conversations
                    .load(id)
                    .await?
                    .map(|c| c.messages.iter().map(Message::to_turn).collect())
                    .unwrap_or_default();
                (id.to_string(), history)
            }
            None => {
                let conversation = self.conversations.create(provider.as_str(), &request.model);
                (conversation.id, Vec::new())
            }
        };
        let history = self
            .trimmer
            .trim(&history, &request.text, provider, request.image.as_ref());

        let generate = GenerateRequest {
            provider,
            model: request.model.clone(),
            prompt: request.text.clone(),
            api_key,
            history,
            image: request.image.clone(),
        };
        let text = self.reply(&generate, request.stream.as_ref()).await?;

        let mut user = Message::user(request.text);
        if let Some(image) = request.image {
            user = user.with_image(image);
        }
        let reply = Message::assistant(text.clone(), provider.as_str());
        let outcome = SendOutcome {
            conversation_id: conversation_id.clone(),
            user_message_id: user.id.clone(),
            assistant_message_id: reply.id.clone(),
            text,
        };

        self.conversations
            .mutate_or_create(&conversation_id, provider.as_str(), &request.model, |c| {
                c.add_message(user);
                c.add_message(reply);
                Ok(())
            })
            .await?;
        Ok(outcome)
    }

    /// Stream when a receiver is given, falling back once to a plain
    /// completion if the stream fails for a reason a retry could fix.
    async fn reply(
        &self,
        request: &GenerateRequest,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String> {
        let Some(events) = events else {
            return Ok(self.adapter.generate(request).await?);
        };

        match self.adapter.stream(request, events).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_retryable() => {
                log::warn!("Streaming {} reply failed, falling back: {}", request.provider, e);
                let text = self.adapter.generate(request).await?;
                let _ = events.send(StreamEvent::Complete(text.clone())).await;
                Ok(text)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Edit a message and, for user messages, produce the reply to the new
    /// text with the conversation's provider and model.
    ///
    /// The reply is generated before anything is saved; if generation fails
    /// the conversation is left untouched.
    pub async fn edit_and_regenerate(
        &self,
        conversation_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<EditReply> {
        let conversation = self
            .conversations
            .load(conversation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        let provider: ProviderKind = conversation.provider.parse().map_err(LLMError::from)?;
        let position = conversation
            .position_of(message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
        let image = conversation.messages[position].image.clone();
        validate_outbound(
            new_text,
            provider,
            &conversation.model,
            image.as_ref(),
            &self.config,
            self.trimmer.limits(),
        )?;

        let edited = &conversation.messages[position];
        if edited.text == new_text {
            return Ok(EditReply::Unchanged);
        }
        if edited.role == Role::Assistant {
            self.conversations
                .edit_message(conversation_id, message_id, new_text)
                .await?;
            return Ok(EditReply::Unchanged);
        }

        // Only the turns before the edited message are context for the new reply
        let history: Vec<Turn> = conversation.messages[..position]
            .iter()
            .map(Message::to_turn)
            .collect();
        let history = self.trimmer.trim(&history, new_text, provider, image.as_ref());
        let request = GenerateRequest {
            provider,
            model: conversation.model.clone(),
            prompt: new_text.to_string(),
            api_key: self.api_key(provider).await?,
            history,
            image,
        };
        let text = self.adapter.generate(&request).await?;

        Ok(self
            .conversations
            .edit_with_reply(conversation_id, message_id, new_text, &text, provider.as_str())
            .await?)
    }

    pub async fn switch_version(
        &self,
        conversation_id: &str,
        message_id: &str,
        version: u32,
    ) -> Result<VersionSwitch> {
        Ok(self
            .conversations
            .switch_version(conversation_id, message_id, version)
            .await?)
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        Ok(self
            .conversations
            .delete_message(conversation_id, message_id)
            .await?)
    }

    /// Hand a message to the background queue.
    pub async fn queue_message(
        &self,
        conversation_id: &str,
        text: &str,
        params: QueuedSendParams,
    ) -> Result<QueuedMessage> {
        Ok(self.queue.enqueue(conversation_id, text, params).await?)
    }
}
