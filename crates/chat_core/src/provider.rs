use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Available provider names
pub const AVAILABLE_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini"];

/// The LLM backends the pipeline can talk to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown provider: {0}. Available providers: openai, anthropic, gemini")]
pub struct UnknownProvider(pub String);

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAI));
        assert_eq!(" anthropic ".parse::<ProviderKind>(), Ok(ProviderKind::Anthropic));
        assert_eq!("gemini".parse::<ProviderKind>(), Ok(ProviderKind::Gemini));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = "mistral".parse::<ProviderKind>().unwrap_err();
        assert!(err.to_string().contains("Unknown provider: mistral"));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ProviderKind::OpenAI).unwrap();
        assert_eq!(json, "\"openai\"");
        for kind in ProviderKind::ALL {
            assert!(AVAILABLE_PROVIDERS.contains(&kind.as_str()));
        }
    }
}
