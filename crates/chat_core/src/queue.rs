//! Persisted message-queue records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ImageAttachment, Message};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sending,
    Failed,
    Sent,
}

/// An outbound message waiting for delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub id: String,
    pub conversation_id: String,
    pub message: Message,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Earliest time the next delivery attempt may run (linear backoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    pub fn new(conversation_id: impl Into<String>, message: Message, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            message,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries,
            status: QueueStatus::Pending,
            error: None,
            next_attempt_at: None,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Send parameters persisted apart from the queue index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedSendParams {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
}
