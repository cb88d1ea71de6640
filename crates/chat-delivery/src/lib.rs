//! chat-delivery - conversations, the durable send queue and the send path
//!
//! - `store` - versioned conversation persistence with per-id serialisation
//! - `queue` / `worker` - retrying background delivery
//! - `connectivity` - online check gating queue drains
//! - `service` - `ChatService`, the entry point for UI handlers

pub mod connectivity;
pub mod events;
pub mod logging;
pub mod queue;
pub mod service;
pub mod store;
pub mod validation;
pub mod worker;

pub use connectivity::{ConnectivityProbe, HttpProbe, StaticProbe};
pub use events::{QueueEvent, QueueEventBus};
pub use logging::init_logging;
pub use queue::{DrainSummary, MessageQueue, QueueError};
pub use service::{ChatService, SendOutcome, SendRequest, ServiceError};
pub use store::{ConversationStore, EditOutcome, EditReply, StoreError};
pub use worker::{DrainTask, QueueWorker, QueueWorkerHandle};
