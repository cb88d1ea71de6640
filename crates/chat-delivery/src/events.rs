use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chat_core::QueueStatus;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Queue changes, emitted after the change has been persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued {
        id: String,
        conversation_id: String,
    },
    StatusChanged {
        id: String,
        status: QueueStatus,
        retry_count: u32,
        error: Option<String>,
    },
    /// Delivered; the reply was appended as `assistant_message_id`
    Sent {
        id: String,
        conversation_id: String,
        assistant_message_id: String,
    },
    Removed {
        id: String,
    },
}

impl QueueEvent {
    pub fn item_id(&self) -> &str {
        match self {
            QueueEvent::Enqueued { id, .. }
            | QueueEvent::StatusChanged { id, .. }
            | QueueEvent::Sent { id, .. }
            | QueueEvent::Removed { id } => id,
        }
    }
}

/// Fan-out of [`QueueEvent`]s to any number of subscribers.
///
/// Emission never blocks; with no subscribers the event is counted and
/// discarded.
#[derive(Clone)]
pub struct QueueEventBus {
    tx: broadcast::Sender<QueueEvent>,
    undelivered: Arc<AtomicU64>,
}

impl QueueEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            undelivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: QueueEvent) {
        if self.tx.send(event).is_err() {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Events emitted while nobody was subscribed
    pub fn undelivered_count(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}

impl Default for QueueEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
