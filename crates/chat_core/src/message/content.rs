//! Turn and image attachment types
//!
//! A `Turn` is the provider-neutral unit handed to the trimmer and the
//! provider adapter: a role, its text and an optional inline image.

use serde::{Deserialize, Serialize};

use super::Role;

/// Inline image attached to a message (base64 payload + media type)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Base64 encoded image data (no data-URI prefix)
    pub data: String,
    /// Media type, e.g. `image/png`
    pub mime_type: String,
}

impl ImageAttachment {
    /// Create an attachment from raw base64 data
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URI
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        if mime_type.is_empty() || payload.is_empty() {
            return None;
        }
        Some(Self::new(payload, mime_type))
    }

    /// Render as a data URI
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decoded size in bytes, computed from the base64 length.
    pub fn decoded_len(&self) -> usize {
        let trimmed = self.data.trim_end();
        let padding = trimmed.chars().rev().take_while(|c| *c == '=').count();
        (trimmed.len() / 4 * 3 + (trimmed.len() % 4) * 3 / 4).saturating_sub(padding)
    }
}

/// One role/text/image unit of conversation history
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Drop the image, keeping role and text
    pub fn without_image(&self) -> Self {
        Self {
            role: self.role,
            text: self.text.clone(),
            image: None,
        }
    }
}
