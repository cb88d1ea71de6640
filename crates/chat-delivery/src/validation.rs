//! Checks applied to an outbound message before any network or queue work.

use chat_core::{ImageAttachment, PipelineConfig, ProviderKind};
use chat_llm::budget::{estimate, image_tokens, ContextLimits};
use chat_llm::models::supports_vision;
use chat_llm::{LLMError, Result};

/// Reject messages that can never be delivered as-is.
pub fn validate_outbound(
    text: &str,
    provider: ProviderKind,
    model: &str,
    image: Option<&ImageAttachment>,
    config: &PipelineConfig,
    limits: &ContextLimits,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(LLMError::Validation("Message text must not be empty".to_string()));
    }

    let chars = text.chars().count();
    if chars > config.max_prompt_chars {
        return Err(LLMError::Validation(format!(
            "Message is too long ({} characters, limit {})",
            chars, config.max_prompt_chars
        )));
    }

    let tokens = estimate(text, provider)
        + if image.is_some() {
            image_tokens(provider)
        } else {
            0
        };
    let budget = limits.budget(provider);
    if tokens > budget {
        return Err(LLMError::Validation(format!(
            "Message is too long for {} ({} estimated tokens, budget {})",
            provider, tokens, budget
        )));
    }

    if let Some(image) = image {
        let size = image.decoded_len();
        if size > config.max_image_bytes {
            return Err(LLMError::Validation(format!(
                "Image is too large ({} bytes, limit {})",
                size, config.max_image_bytes
            )));
        }
        if !supports_vision(provider, model) {
            return Err(LLMError::UnsupportedModality {
                model: model.to_string(),
            });
        }
    }

    Ok(())
}
