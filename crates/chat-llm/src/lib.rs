//! chat-llm - provider access for the conversation delivery pipeline
//!
//! - `budget` - token estimation, context limits and history trimming
//! - `cache` - content-addressable response cache
//! - `protocol` / `providers` - Gemini, OpenAI and Anthropic wire formats and clients
//! - `registry` - lazily constructed provider clients
//! - `adapter` - the uniform `generate` / `stream` entry point

pub mod adapter;
pub mod budget;
pub mod cache;
pub mod models;
pub mod protocol;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod registry;

pub use adapter::{GenerateRequest, ProviderAdapter, StreamEvent};
pub use budget::{ContextLimits, ContextTrimmer, TrimReport};
pub use cache::{CacheRequest, ResponseCache};
pub use provider::{LLMError, LLMProvider, Result};
pub use provider_factory::create_provider;
pub use registry::ProviderRegistry;
