//! Anthropic Messages API protocol conversion.
//!
//! Every message carries an array of content blocks; images are base64
//! `image` blocks. The API requires the conversation to open with a user
//! message and roles to alternate, so leading assistant turns are dropped
//! and consecutive same-role turns are merged into one message.

use chat_core::{Role, Turn};
use serde::{Deserialize, Serialize};

use crate::protocol::{FromProvider, ProtocolError, ProtocolResult, ToProvider};

/// Media types the Messages API accepts for image blocks
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnthropicImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponseBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ToProvider<Vec<AnthropicContentBlock>> for Turn {
    fn to_provider(&self) -> ProtocolResult<Vec<AnthropicContentBlock>> {
        let mut blocks = Vec::with_capacity(2);
        if let Some(image) = &self.image {
            if !SUPPORTED_IMAGE_TYPES.contains(&image.mime_type.as_str()) {
                return Err(ProtocolError::UnsupportedFeature {
                    feature: format!("image type {}", image.mime_type),
                    protocol: "anthropic".to_string(),
                });
            }
            blocks.push(AnthropicContentBlock::Image {
                source: AnthropicImageSource {
                    source_type: "base64".to_string(),
                    media_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            });
        }
        // Empty text blocks are rejected by the API
        if !self.text.trim().is_empty() {
            blocks.push(AnthropicContentBlock::Text {
                text: self.text.clone(),
            });
        }
        Ok(blocks)
    }
}

impl ToProvider<Vec<AnthropicMessage>> for Vec<Turn> {
    fn to_provider(&self) -> ProtocolResult<Vec<AnthropicMessage>> {
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(self.len());

        for turn in self {
            if messages.is_empty() && turn.role == Role::Assistant {
                continue;
            }
            let blocks = ToProvider::<Vec<AnthropicContentBlock>>::to_provider(turn)?;
            if blocks.is_empty() {
                continue;
            }
            match messages.last_mut() {
                Some(last) if last.role == turn.role.as_str() => last.content.extend(blocks),
                _ => messages.push(AnthropicMessage {
                    role: turn.role.as_str().to_string(),
                    content: blocks,
                }),
            }
        }

        if messages.is_empty() {
            return Err(ProtocolError::MissingField("messages".to_string()));
        }
        Ok(messages)
    }
}

impl FromProvider<AnthropicResponse> for String {
    fn from_provider(response: AnthropicResponse) -> ProtocolResult<Self> {
        Ok(response
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ImageAttachment;
    use serde_json::json;

    #[test]
    fn test_image_turn_to_blocks() {
        let turn = Turn::user("Describe").with_image(ImageAttachment::new("iVBOR", "image/png"));
        let blocks: Vec<AnthropicContentBlock> = turn.to_provider().unwrap();
        assert_eq!(
            serde_json::to_value(&blocks).unwrap(),
            json!([
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
                {"type": "text", "text": "Describe"}
            ])
        );
    }

    #[test]
    fn test_unsupported_image_type() {
        let turn = Turn::user("x").with_image(ImageAttachment::new("AAAA", "image/bmp"));
        let result: ProtocolResult<Vec<AnthropicContentBlock>> = turn.to_provider();
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_leading_assistant_dropped_and_roles_merged() {
        let turns = vec![
            Turn::assistant("Welcome!"),
            Turn::user("first"),
            Turn::user("second"),
            Turn::assistant("reply"),
            Turn::user("third"),
        ];

        let messages: Vec<AnthropicMessage> = turns.to_provider().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(messages[0].content.len(), 2);
    }

    #[test]
    fn test_response_to_text() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(String::from_provider(response).unwrap(), "Hello there");
    }
}
