//! Message module - stored chat messages and their version history
//!
//! A message keeps its current text at the top level and, once edited, the
//! full list of alternate versions. Exactly one version is active and the
//! top-level `text`/`provider` always mirror it, so readers that ignore
//! versions still see the right content.

mod content;

pub use content::{ImageAttachment, Turn};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One alternate text/provider pairing of a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub is_active: bool,
    /// For assistant versions: the user version number this response answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u32>,
}

/// Audit entry written on every edit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditRecord {
    pub previous_text: String,
    pub edited_at: DateTime<Utc>,
}

/// Result of switching a message to a version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSwitch {
    Switched,
    AlreadyActive,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditRecord>,
    /// For assistant replies: the user version the current text answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), None)
    }

    pub fn assistant(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into(), Some(provider.into()))
    }

    fn new(role: Role, text: String, provider: Option<String>) -> Self {
        Self {
            id: generate_id(),
            role,
            text,
            provider,
            image: None,
            reactions: Vec::new(),
            is_favorite: false,
            versions: Vec::new(),
            edit_history: Vec::new(),
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_reply_to(mut self, user_version: u32) -> Self {
        self.reply_to = Some(user_version);
        self
    }

    /// Project onto the provider-neutral turn representation
    pub fn to_turn(&self) -> Turn {
        Turn {
            role: self.role,
            text: self.text.clone(),
            image: self.image.clone(),
        }
    }

    pub fn active_version(&self) -> Option<&Version> {
        self.versions.iter().find(|v| v.is_active)
    }

    /// Active version number; an unedited message is implicitly version 1.
    pub fn active_version_number(&self) -> u32 {
        self.active_version().map(|v| v.version).unwrap_or(1)
    }

    pub fn highest_version_number(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(1)
    }

    /// Synthesize version 1 from the current text if no versions exist yet.
    fn ensure_original_version(&mut self) {
        if !self.versions.is_empty() {
            return;
        }
        let reply_to = match self.role {
            Role::Assistant => Some(self.reply_to.unwrap_or(1)),
            Role::User => None,
        };
        self.versions.push(Version {
            text: self.text.clone(),
            provider: self.provider.clone(),
            timestamp: self.created_at,
            version: 1,
            is_active: true,
            reply_to,
        });
    }

    /// Append a new active version and mirror it onto the message.
    ///
    /// Returns the new version number.
    pub fn push_version(
        &mut self,
        text: impl Into<String>,
        provider: Option<String>,
        reply_to: Option<u32>,
    ) -> u32 {
        self.ensure_original_version();
        for version in &mut self.versions {
            version.is_active = false;
        }

        let number = self.highest_version_number() + 1;
        let text = text.into();
        self.versions.push(Version {
            text: text.clone(),
            provider: provider.clone(),
            timestamp: Utc::now(),
            version: number,
            is_active: true,
            reply_to,
        });
        self.text = text;
        self.provider = provider;
        self.reply_to = reply_to;
        number
    }

    /// Edit the message text, recording the previous text.
    pub fn edit(&mut self, new_text: impl Into<String>) -> u32 {
        self.edit_history.push(EditRecord {
            previous_text: self.text.clone(),
            edited_at: Utc::now(),
        });
        let provider = self.provider.clone();
        let reply_to = match self.role {
            Role::Assistant => self
                .active_version()
                .and_then(|v| v.reply_to)
                .or(self.reply_to)
                .or(Some(1)),
            Role::User => None,
        };
        self.push_version(new_text, provider, reply_to)
    }

    pub fn switch_to_version(&mut self, number: u32) -> VersionSwitch {
        if self.versions.is_empty() {
            // An unedited message is implicitly version 1
            return if number == 1 {
                VersionSwitch::AlreadyActive
            } else {
                VersionSwitch::NotFound
            };
        }
        let Some(target) = self.versions.iter().find(|v| v.version == number).cloned() else {
            return VersionSwitch::NotFound;
        };
        if target.is_active {
            return VersionSwitch::AlreadyActive;
        }

        for version in &mut self.versions {
            version.is_active = version.version == number;
        }
        self.text = target.text;
        self.provider = target.provider;
        self.reply_to = target.reply_to;
        VersionSwitch::Switched
    }

    /// Version that answers the given user version, if one is linked.
    pub fn version_answering(&self, user_version: u32) -> Option<u32> {
        self.versions
            .iter()
            .filter(|v| v.reply_to == Some(user_version))
            .map(|v| v.version)
            .max()
    }
}
