//! Anthropic Messages API provider implementation.

use async_trait::async_trait;
use chat_core::{ProviderKind, Turn};
use reqwest::Client;

use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest, AnthropicResponse};
use crate::protocol::{FromProvider, ToProvider};
use crate::provider::{LLMProvider, Result};
use crate::providers::common::{check_response, non_empty};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn complete(&self, turns: &[Turn], model: Option<&str>) -> Result<String> {
        let turns_vec: Vec<Turn> = turns.to_vec();
        let messages: Vec<AnthropicMessage> = turns_vec.to_provider()?;
        let request = AnthropicRequest {
            model: model.unwrap_or(&self.model).to_string(),
            max_tokens: self.max_tokens,
            messages,
        };

        log::debug!(
            "Anthropic request: model={}, messages={}, max_tokens={}",
            request.model,
            request.messages.len(),
            request.max_tokens
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response = check_response("Anthropic", response).await?;
        let body: AnthropicResponse = response.json().await?;
        let text = String::from_provider(body)?;

        non_empty("anthropic", text)
    }
}
