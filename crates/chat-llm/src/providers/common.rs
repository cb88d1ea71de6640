//! Shared helpers for provider implementations.

use chat_core::Config;
use reqwest::{Client, Response};

use crate::provider::{LLMError, Result};

/// Build an HTTP client honouring the configured proxies.
pub fn build_http_client(config: &Config) -> Result<Client> {
    let mut builder = Client::builder();

    if !config.http_proxy.is_empty() {
        builder = builder.proxy(reqwest::Proxy::http(&config.http_proxy)?);
    }
    if !config.https_proxy.is_empty() {
        builder = builder.proxy(reqwest::Proxy::https(&config.https_proxy)?);
    }

    Ok(builder.build()?)
}

/// Map a non-success response onto [`LLMError`].
///
/// 401/403 become [`LLMError::Auth`]; every other failure keeps its status in
/// [`LLMError::Api`] so retry policy can be decided by the caller.
pub async fn check_response(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();

    if status == 401 || status == 403 {
        return Err(LLMError::Auth(format!(
            "{} authentication failed: {}. Please check your API key.",
            provider, text
        )));
    }

    log::warn!("{} API error: HTTP {}: {}", provider, status, text);
    Err(LLMError::Api {
        status: status.as_u16(),
        message: text,
    })
}

/// Reject completions that carry no text.
pub fn non_empty(provider: &str, text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(LLMError::EmptyResponse(provider.to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_proxy() {
        let mut config = Config::default();
        config.https_proxy = "http://127.0.0.1:3128".to_string();
        assert!(build_http_client(&config).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let mut config = Config::default();
        config.http_proxy = "::not a url::".to_string();
        assert!(matches!(build_http_client(&config), Err(LLMError::Http(_))));
    }

    #[test]
    fn test_non_empty() {
        assert!(matches!(
            non_empty("gemini", "  \n".to_string()),
            Err(LLMError::EmptyResponse(_))
        ));
        assert_eq!(non_empty("gemini", "ok".to_string()).unwrap(), "ok");
    }
}
