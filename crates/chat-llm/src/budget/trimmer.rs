//! Context trimming for budget management.
//!
//! Keeps the most recent history turns that fit a provider's token budget
//! alongside the new prompt. Truncation is purely chronological: the oldest
//! turns go first and a turn is never split.

use chat_core::{ImageAttachment, ProviderKind, Turn};

use crate::budget::estimator::{TokenCounter, TokenEstimator};
use crate::budget::limits::ContextLimits;

/// What a trim pass kept and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimReport {
    pub kept: usize,
    pub dropped: usize,
    /// Tokens used by the kept history plus the prompt (and its image)
    pub used_tokens: u32,
    pub budget: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ContextTrimmer {
    limits: ContextLimits,
}

impl ContextTrimmer {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    /// Return the longest suffix of `history` that fits next to `prompt`.
    pub fn trim(
        &self,
        history: &[Turn],
        prompt: &str,
        provider: ProviderKind,
        image: Option<&ImageAttachment>,
    ) -> Vec<Turn> {
        self.trim_with_report(history, prompt, provider, image).0
    }

    /// Like [`trim`](Self::trim), also reporting token usage.
    ///
    /// Walks history from newest to oldest and stops at the first turn that
    /// would overflow the budget. When the prompt alone does not fit, the
    /// result is empty; the prompt itself is never shortened.
    pub fn trim_with_report(
        &self,
        history: &[Turn],
        prompt: &str,
        provider: ProviderKind,
        image: Option<&ImageAttachment>,
    ) -> (Vec<Turn>, TrimReport) {
        let counter = TokenEstimator::for_provider(provider);
        let budget = self.limits.budget(provider);

        let image_cost = if image.is_some() {
            counter.image_tokens()
        } else {
            0
        };
        let prompt_tokens = counter.count_text(prompt).saturating_add(image_cost);

        if prompt_tokens > budget {
            tracing::warn!(
                "Prompt ({tokens} tokens) exceeds {provider} budget ({budget} tokens), sending without history",
                tokens = prompt_tokens,
                provider = provider,
                budget = budget
            );
            let report = TrimReport {
                kept: 0,
                dropped: history.len(),
                used_tokens: prompt_tokens,
                budget,
            };
            return (Vec::new(), report);
        }

        let mut used = prompt_tokens;
        let mut start = history.len();
        for (index, turn) in history.iter().enumerate().rev() {
            let cost = counter.count_turn(turn);
            if used.saturating_add(cost) > budget {
                break;
            }
            used = used.saturating_add(cost);
            start = index;
        }

        let kept = history[start..].to_vec();
        let report = TrimReport {
            kept: kept.len(),
            dropped: start,
            used_tokens: used,
            budget,
        };

        if report.dropped > 0 {
            tracing::debug!(
                "Trimmed {dropped} of {total} turns for {provider} ({used}/{budget} tokens)",
                dropped = report.dropped,
                total = history.len(),
                provider = provider,
                used = used,
                budget = budget
            );
        }

        (kept, report)
    }
}

/// Trim with the default context windows and safety margin.
pub fn trim(
    history: &[Turn],
    prompt: &str,
    provider: ProviderKind,
    image: Option<&ImageAttachment>,
) -> Vec<Turn> {
    ContextTrimmer::default().trim(history, prompt, provider, image)
}
