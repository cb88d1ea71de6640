use async_trait::async_trait;
use chat_core::{ProviderKind, Turn};
use reqwest::Client;

use crate::protocol::openai::{OpenAIMessage, OpenAIRequest, OpenAIResponse};
use crate::protocol::{FromProvider, ToProvider};
use crate::provider::{LLMProvider, Result};
use crate::providers::common::{check_response, non_empty};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
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
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn complete(&self, turns: &[Turn], model: Option<&str>) -> Result<String> {
        let turns_vec: Vec<Turn> = turns.to_vec();
        let messages: Vec<OpenAIMessage> = turns_vec.to_provider()?;
        let request = OpenAIRequest {
            model: model.unwrap_or(&self.model).to_string(),
            messages,
            max_tokens: self.max_tokens,
        };

        log::debug!(
            "OpenAI request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let response = check_response("OpenAI", response).await?;
        let body: OpenAIResponse = response.json().await?;
        let text = String::from_provider(body)?;

        non_empty("openai", text)
    }
}
