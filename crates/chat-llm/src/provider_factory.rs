//! Provider Factory
//!
//! Creates LLM providers from configuration and an API key.

use std::sync::Arc;

use chat_core::{Config, ProviderConfig, ProviderKind};

use crate::provider::{LLMError, LLMProvider};
use crate::providers::common::build_http_client;
use crate::providers::{AnthropicProvider, GeminiProvider, OpenAIProvider};

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Create a provider client for `kind` using `api_key`.
///
/// Base URL, default model, max tokens and proxies come from `config`.
pub fn create_provider(
    kind: ProviderKind,
    api_key: &str,
    config: &Config,
) -> Result<Arc<dyn LLMProvider>, LLMError> {
    if api_key.trim().is_empty() {
        return Err(LLMError::Auth(format!("{} API key is required", display_name(kind))));
    }

    let client = build_http_client(config)?;
    let defaults = ProviderConfig::default();
    let settings = config.provider(kind).unwrap_or(&defaults);

    let provider: Arc<dyn LLMProvider> = match kind {
        ProviderKind::OpenAI => {
            let mut provider = OpenAIProvider::new(api_key).with_client(client);
            if let Some(base_url) = non_empty(&settings.base_url) {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = non_empty(&settings.model) {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = settings.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            Arc::new(provider)
        }

        ProviderKind::Anthropic => {
            let mut provider = AnthropicProvider::new(api_key).with_client(client);
            if let Some(base_url) = non_empty(&settings.base_url) {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = non_empty(&settings.model) {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = settings.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            Arc::new(provider)
        }

        ProviderKind::Gemini => {
            let mut provider = GeminiProvider::new(api_key).with_client(client);
            if let Some(base_url) = non_empty(&settings.base_url) {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = non_empty(&settings.model) {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = settings.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            Arc::new(provider)
        }
    };

    log::info!("Created {} provider client", kind);
    Ok(provider)
}

fn display_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAI => "OpenAI",
        ProviderKind::Anthropic => "Anthropic",
        ProviderKind::Gemini => "Gemini",
    }
}
