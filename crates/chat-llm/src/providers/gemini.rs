//! Google Gemini provider implementation.

use async_trait::async_trait;
use chat_core::{ProviderKind, Turn};
use reqwest::Client;
use serde_json::json;

use crate::protocol::gemini::{GeminiRequest, GeminiResponse};
use crate::protocol::{FromProvider, ToProvider};
use crate::provider::{LLMProvider, Result};
use crate::providers::common::{check_response, non_empty};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl GeminiProvider {
    /// Create a new Gemini provider with an API key.
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

    /// Set a custom base URL (e.g., for proxies or alternative endpoints).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model name (e.g., "gemini-1.5-pro").
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
impl LLMProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn complete(&self, turns: &[Turn], model: Option<&str>) -> Result<String> {
        let model_to_use = model.unwrap_or(&self.model);

        let turns_vec: Vec<Turn> = turns.to_vec();
        let mut request: GeminiRequest = turns_vec.to_provider()?;
        if let Some(max_tokens) = self.max_tokens {
            request.generation_config = Some(json!({ "maxOutputTokens": max_tokens }));
        }

        log::debug!(
            "Gemini request: model={}, contents={}",
            model_to_use,
            request.contents.len()
        );

        // Header auth keeps the key out of the URL and any error built from it
        let url = format!("{}/models/{}:generateContent", self.base_url, model_to_use);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response = check_response("Gemini", response).await?;
        let body: GeminiResponse = response.json().await?;
        let text = String::from_provider(body)?;

        non_empty("gemini", text)
    }
}
