//! Provider context window limits.
//!
//! Each provider has a nominal context window; the usable budget is that
//! window scaled by a safety margin. Windows can be overridden per provider
//! through configuration.

use std::collections::HashMap;

use chat_core::{Config, ProviderKind};

/// Nominal context window sizes, in tokens.
pub const DEFAULT_CONTEXT_WINDOWS: &[(ProviderKind, u32)] = &[
    (ProviderKind::OpenAI, 128_000),
    (ProviderKind::Anthropic, 200_000),
    (ProviderKind::Gemini, 1_048_576),
];

/// Fraction of the context window the trimmer may fill.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct ContextLimits {
    overrides: HashMap<ProviderKind, u32>,
    safety_margin: f64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl ContextLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take per-provider `context_window` overrides and the pipeline's
    /// safety margin from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut limits = Self::default();
        for kind in ProviderKind::ALL {
            if let Some(window) = config.provider(kind).and_then(|p| p.context_window) {
                limits.overrides.insert(kind, window);
            }
        }
        let margin = config.pipeline.context_safety_margin;
        if margin > 0.0 && margin <= 1.0 {
            limits.safety_margin = margin;
        } else {
            tracing::warn!(
                "Ignoring context_safety_margin {margin}, using {default}",
                margin = margin,
                default = DEFAULT_SAFETY_MARGIN
            );
        }
        limits
    }

    pub fn with_window(mut self, provider: ProviderKind, window: u32) -> Self {
        self.overrides.insert(provider, window);
        self
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn context_window(&self, provider: ProviderKind) -> u32 {
        if let Some(window) = self.overrides.get(&provider) {
            return *window;
        }
        DEFAULT_CONTEXT_WINDOWS
            .iter()
            .find(|(kind, _)| *kind == provider)
            .map(|(_, window)| *window)
            .unwrap_or(128_000)
    }

    /// Usable token budget: the context window scaled by the safety margin.
    pub fn budget(&self, provider: ProviderKind) -> u32 {
        (self.context_window(provider) as f64 * self.safety_margin).floor() as u32
    }
}

/// Budget for `provider` with default windows and margin.
pub fn budget(provider: ProviderKind) -> u32 {
    ContextLimits::default().budget(provider)
}
