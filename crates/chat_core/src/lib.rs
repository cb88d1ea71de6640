//! chat_core - Core types for the conversation delivery pipeline
//!
//! This crate provides the foundational types used across the pipeline crates:
//! - `message` - Message, Version, Turn and image attachments
//! - `conversation` - the persisted conversation aggregate
//! - `queue` - outbound queue records
//! - `storage` - the key-value persistence seam
//! - `secrets` - API key lookup
//! - `config` / `paths` - configuration loading

pub mod config;
pub mod conversation;
pub mod encryption;
pub mod message;
pub mod paths;
pub mod provider;
pub mod queue;
pub mod secrets;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, PipelineConfig, ProviderConfig, ProviderConfigs};
pub use conversation::Conversation;
pub use message::{EditRecord, ImageAttachment, Message, Role, Turn, Version, VersionSwitch};
pub use provider::{ProviderKind, UnknownProvider, AVAILABLE_PROVIDERS};
pub use queue::{QueueStatus, QueuedMessage, QueuedSendParams};
pub use secrets::{ConfigSecretStore, EncryptedSecretStore, SecretError, SecretStore, StaticSecretStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, StorageResult};
