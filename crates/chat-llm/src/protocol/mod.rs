//! Protocol conversion traits and wire types.
//!
//! Provider-neutral [`Turn`](chat_core::Turn)s convert into each backend's
//! request schema, and each backend's response converts back into plain text.
//!
//! ```text
//! Provider Types (Gemini, OpenAI, Anthropic)
//!     ↕
//! chat_core::Turn / String
//! ```

mod errors;
pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use errors::{ProtocolError, ProtocolResult};

/// Trait for converting provider-specific types to internal types.
pub trait FromProvider<T>: Sized {
    fn from_provider(value: T) -> ProtocolResult<Self>;
}

/// Trait for converting internal types to provider-specific types.
pub trait ToProvider<T>: Sized {
    fn to_provider(&self) -> ProtocolResult<T>;
}
