//! OpenAI chat completions protocol conversion.
//!
//! Text-only turns use a plain string `content`. A turn with an image uses
//! the array form with a `text` part and an `image_url` part holding a
//! data-URI.

use chat_core::Turn;
use serde::{Deserialize, Serialize};

use crate::protocol::{FromProvider, ProtocolError, ProtocolResult, ToProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: OpenAIContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAIImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIResponse {
    #[serde(default)]
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ToProvider<OpenAIMessage> for Turn {
    fn to_provider(&self) -> ProtocolResult<OpenAIMessage> {
        let content = match &self.image {
            None => OpenAIContent::Text(self.text.clone()),
            Some(image) => {
                let mut parts = Vec::with_capacity(2);
                if !self.text.is_empty() {
                    parts.push(OpenAIContentPart::Text {
                        text: self.text.clone(),
                    });
                }
                parts.push(OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: image.data_uri(),
                    },
                });
                OpenAIContent::Parts(parts)
            }
        };

        Ok(OpenAIMessage {
            role: self.role.as_str().to_string(),
            content,
        })
    }
}

impl ToProvider<Vec<OpenAIMessage>> for Vec<Turn> {
    fn to_provider(&self) -> ProtocolResult<Vec<OpenAIMessage>> {
        let messages = self
            .iter()
            .map(ToProvider::<OpenAIMessage>::to_provider)
            .collect::<ProtocolResult<Vec<_>>>()?;
        if messages.is_empty() {
            return Err(ProtocolError::MissingField("messages".to_string()));
        }
        Ok(messages)
    }
}

impl FromProvider<OpenAIResponse> for String {
    fn from_provider(response: OpenAIResponse) -> ProtocolResult<Self> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::MissingField("choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}
