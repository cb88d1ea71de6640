//! Model capability table.
//!
//! Patterns are matched as substrings of the lower-cased model name; the
//! longest matching pattern wins, so `gpt-4o-mini` is decided by its own
//! entry rather than by `gpt-4`.

use chat_core::ProviderKind;

/// (provider, model pattern, accepts image input)
pub const KNOWN_MODELS: &[(ProviderKind, &str, bool)] = &[
    // OpenAI models
    (ProviderKind::OpenAI, "gpt-5", true),
    (ProviderKind::OpenAI, "gpt-4.1", true),
    (ProviderKind::OpenAI, "gpt-4o", true),
    (ProviderKind::OpenAI, "gpt-4o-mini", true),
    (ProviderKind::OpenAI, "gpt-4-turbo", true),
    (ProviderKind::OpenAI, "gpt-4-vision", true),
    (ProviderKind::OpenAI, "gpt-4", false),
    (ProviderKind::OpenAI, "gpt-3.5-turbo", false),
    (ProviderKind::OpenAI, "o1", true),
    (ProviderKind::OpenAI, "o1-mini", false),
    (ProviderKind::OpenAI, "o3", true),
    (ProviderKind::OpenAI, "o3-mini", false),
    (ProviderKind::OpenAI, "o4-mini", true),
    // Anthropic models
    (ProviderKind::Anthropic, "claude-3", true),
    (ProviderKind::Anthropic, "claude-3-5-haiku", false),
    (ProviderKind::Anthropic, "claude-sonnet-4", true),
    (ProviderKind::Anthropic, "claude-opus-4", true),
    (ProviderKind::Anthropic, "claude-haiku-4", true),
    (ProviderKind::Anthropic, "claude-2", false),
    (ProviderKind::Anthropic, "claude-instant", false),
    // Gemini models
    (ProviderKind::Gemini, "gemini-pro", false),
    (ProviderKind::Gemini, "gemini-1.0-pro", false),
    (ProviderKind::Gemini, "gemini-pro-vision", true),
    (ProviderKind::Gemini, "gemini-1.5", true),
    (ProviderKind::Gemini, "gemini-2", true),
];

/// Whether `model` on `provider` accepts image input.
///
/// Unknown models are treated as text-only.
pub fn supports_vision(provider: ProviderKind, model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    KNOWN_MODELS
        .iter()
        .filter(|(kind, pattern, _)| *kind == provider && model.contains(pattern))
        .max_by_key(|(_, pattern, _)| pattern.len())
        .map(|(_, _, vision)| *vision)
        .unwrap_or(false)
}
