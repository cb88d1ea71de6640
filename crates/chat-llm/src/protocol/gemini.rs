//! Google Gemini protocol conversion.
//!
//! Gemini calls messages "contents", uses the role "model" for assistant
//! turns and carries images as `inline_data` parts next to the text part.
//!
//! ```json
//! {
//!   "contents": [
//!     {"role": "user", "parts": [{"text": "What is this?"},
//!       {"inline_data": {"mime_type": "image/png", "data": "iVBOR..."}}]}
//!   ]
//! }
//! ```

use chat_core::{Role, Turn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{FromProvider, ProtocolError, ProtocolResult, ToProvider};

/// Gemini request format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    /// Generation config (max output tokens, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
}

/// Gemini message/content format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    /// "user" or "model" (not "assistant")
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// Gemini content part
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(alias = "inlineData", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiInlineData {
    #[serde(alias = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Gemini response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(alias = "promptFeedback", skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(alias = "finishReason", skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ToProvider<GeminiContent> for Turn {
    fn to_provider(&self) -> ProtocolResult<GeminiContent> {
        let role = match self.role {
            Role::User => "user",
            Role::Assistant => "model",
        };

        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(GeminiPart {
                text: Some(self.text.clone()),
                ..Default::default()
            });
        }
        if let Some(image) = &self.image {
            parts.push(GeminiPart {
                inline_data: Some(GeminiInlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                }),
                ..Default::default()
            });
        }
        if parts.is_empty() {
            return Err(ProtocolError::InvalidContent(format!(
                "{} turn has neither text nor image",
                self.role.as_str()
            )));
        }

        Ok(GeminiContent {
            role: role.to_string(),
            parts,
        })
    }
}

impl ToProvider<GeminiRequest> for Vec<Turn> {
    fn to_provider(&self) -> ProtocolResult<GeminiRequest> {
        let contents = self
            .iter()
            .filter(|turn| !turn.text.is_empty() || turn.image.is_some())
            .map(ToProvider::<GeminiContent>::to_provider)
            .collect::<ProtocolResult<Vec<GeminiContent>>>()?;

        if contents.is_empty() {
            return Err(ProtocolError::MissingField("contents".to_string()));
        }

        Ok(GeminiRequest {
            contents,
            generation_config: None,
        })
    }
}

impl FromProvider<GeminiResponse> for String {
    fn from_provider(response: GeminiResponse) -> ProtocolResult<Self> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::MissingField("candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }
}
