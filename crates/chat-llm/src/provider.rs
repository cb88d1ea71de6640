use async_trait::async_trait;
use chat_core::{ProviderKind, Turn, UnknownProvider};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model '{model}' does not accept image input")]
    UnsupportedModality { model: String },

    #[error(transparent)]
    UnsupportedProvider(#[from] UnknownProvider),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Protocol conversion error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),
}

impl LLMError {
    /// Whether a later attempt may succeed without user intervention.
    ///
    /// Transport failures, timeouts, rate limiting, server errors and empty
    /// completions are transient. Bad keys, bad input and unknown providers
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Http(e) => !e.is_builder(),
            LLMError::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            LLMError::EmptyResponse(_) => true,
            LLMError::Json(_)
            | LLMError::Auth(_)
            | LLMError::Validation(_)
            | LLMError::UnsupportedModality { .. }
            | LLMError::UnsupportedProvider(_)
            | LLMError::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for LLMError {
    // The URL is dropped: error text is persisted on queue items and broadcast
    fn from(e: reqwest::Error) -> Self {
        LLMError::Http(e.without_url())
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Which backend this client talks to
    fn kind(&self) -> ProviderKind;

    /// Single-shot completion over an ordered list of turns
    ///
    /// # Arguments
    /// * `turns` - History followed by the new user turn
    /// * `model` - Optional model override. If None, uses the provider's default model
    async fn complete(&self, turns: &[Turn], model: Option<&str>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> LLMError {
        LLMError::Api {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(api(429).is_retryable());
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(api(408).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(404).is_retryable());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!LLMError::Auth("bad key".into()).is_retryable());
        assert!(!LLMError::Validation("empty".into()).is_retryable());
        assert!(!LLMError::UnsupportedModality {
            model: "gpt-3.5-turbo".into()
        }
        .is_retryable());
        assert!(!LLMError::UnsupportedProvider(UnknownProvider("x".into())).is_retryable());
        assert!(LLMError::EmptyResponse("gemini".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_http_error_drops_request_url() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let raw = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{port}/v1?key=query-secret"))
            .send()
            .await
            .unwrap_err();
        assert!(raw.url().is_some());

        let err = LLMError::from(raw);
        let LLMError::Http(inner) = &err else {
            panic!("expected an HTTP error, got {err:?}");
        };
        assert!(inner.url().is_none());
        assert!(!err.to_string().contains("query-secret"));
    }

    #[test]
    fn test_api_error_message_format() {
        assert_eq!(api(502).to_string(), "API error: HTTP 502: boom");
    }
}
