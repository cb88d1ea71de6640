//! Token estimation for budget management.
//!
//! Provides a provider-aware heuristic estimate. Text is split into word
//! runs, numeric literals, punctuation clusters and non-ASCII characters, each
//! class carrying its own weight, plus a 10% safety margin.

use chat_core::{ProviderKind, Turn};
use once_cell::sync::Lazy;
use regex::Regex;

/// Inputs longer than this (in chars) are only class-matched up to the
/// threshold; the remainder falls back to a chars-per-token ratio.
pub const LONG_TEXT_THRESHOLD: usize = 20_000;

/// Safety margin multiplier applied to every estimate (10% extra).
pub const SAFETY_MARGIN: f64 = 1.1;

static TOKEN_CLASSES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z]+|[0-9]+|[^\x00-\x7F]|[!-/:-@\[-`{-~]+")
        .expect("token class pattern is valid")
});

/// Per-class weights for one provider's tokenizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenWeights {
    /// Cost of each started group of 8 letters in a word run
    pub word: f64,
    /// Cost of each started group of 3 digits in a numeric literal
    pub number: f64,
    /// Cost of one run of ASCII punctuation
    pub punctuation: f64,
    /// Cost of a single non-ASCII character
    pub non_ascii: f64,
    /// Fallback ratio used past [`LONG_TEXT_THRESHOLD`]
    pub chars_per_token: f64,
    /// Fixed surcharge for an attached image
    pub image_tokens: u32,
}

impl TokenWeights {
    pub const fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::OpenAI => Self {
                word: 1.30,
                number: 1.0,
                punctuation: 1.0,
                non_ascii: 2.60,
                chars_per_token: 4.0,
                image_tokens: 765,
            },
            ProviderKind::Anthropic => Self {
                word: 1.40,
                number: 1.0,
                punctuation: 1.0,
                non_ascii: 2.80,
                chars_per_token: 3.5,
                image_tokens: 1600,
            },
            ProviderKind::Gemini => Self {
                word: 1.25,
                number: 1.0,
                punctuation: 1.0,
                non_ascii: 2.50,
                chars_per_token: 4.0,
                image_tokens: 258,
            },
        }
    }
}

/// Trait for token counting implementations.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a plain text string.
    fn count_text(&self, text: &str) -> u32;

    /// Fixed cost of one attached image.
    fn image_tokens(&self) -> u32;

    /// Count tokens in a single turn (text plus image surcharge).
    fn count_turn(&self, turn: &Turn) -> u32 {
        let image = if turn.image.is_some() {
            self.image_tokens()
        } else {
            0
        };
        self.count_text(&turn.text).saturating_add(image)
    }

    /// Count tokens in multiple turns.
    fn count_turns(&self, turns: &[Turn]) -> u32 {
        turns
            .iter()
            .fold(0u32, |acc, t| acc.saturating_add(self.count_turn(t)))
    }
}

/// Heuristic estimator parameterised by a provider's [`TokenWeights`].
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    weights: TokenWeights,
}

impl TokenEstimator {
    pub fn new(weights: TokenWeights) -> Self {
        Self { weights }
    }

    pub fn for_provider(provider: ProviderKind) -> Self {
        Self::new(TokenWeights::for_provider(provider))
    }

    pub fn weights(&self) -> &TokenWeights {
        &self.weights
    }

    fn class_weighted(&self, text: &str) -> f64 {
        let w = &self.weights;
        TOKEN_CLASSES
            .find_iter(text)
            .map(|m| {
                let s = m.as_str();
                let first = s.as_bytes()[0];
                if first.is_ascii_alphabetic() {
                    w.word * s.len().div_ceil(8) as f64
                } else if first.is_ascii_digit() {
                    w.number * s.len().div_ceil(3) as f64
                } else if first.is_ascii() {
                    w.punctuation
                } else {
                    w.non_ascii
                }
            })
            .sum()
    }
}

impl TokenCounter for TokenEstimator {
    fn count_text(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let weighted = match text.char_indices().nth(LONG_TEXT_THRESHOLD) {
            Some((split, _)) => {
                let (head, tail) = text.split_at(split);
                let tail_chars = tail.chars().count() as f64;
                self.class_weighted(head) + tail_chars / self.weights.chars_per_token
            }
            None => self.class_weighted(text),
        };

        let estimate = (weighted * SAFETY_MARGIN).ceil();
        (estimate.min(u32::MAX as f64) as u32).max(1)
    }

    fn image_tokens(&self) -> u32 {
        self.weights.image_tokens
    }
}

/// Estimate tokens for `text` as seen by `provider`.
pub fn estimate(text: &str, provider: ProviderKind) -> u32 {
    TokenEstimator::for_provider(provider).count_text(text)
}

/// Fixed token surcharge for an image sent to `provider`.
pub fn image_tokens(provider: ProviderKind) -> u32 {
    TokenWeights::for_provider(provider).image_tokens
}

pub fn estimate_turn(turn: &Turn, provider: ProviderKind) -> u32 {
    TokenEstimator::for_provider(provider).count_turn(turn)
}

pub fn estimate_turns(turns: &[Turn], provider: ProviderKind) -> u32 {
    TokenEstimator::for_provider(provider).count_turns(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ImageAttachment;

    #[test]
    fn empty_text_is_zero() {
        for provider in ProviderKind::ALL {
            assert_eq!(estimate("", provider), 0);
        }
    }

    #[test]
    fn non_empty_text_is_at_least_one() {
        for provider in ProviderKind::ALL {
            assert!(estimate(" ", provider) >= 1);
            assert!(estimate("a", provider) >= 1);
            assert!(estimate("\n\t", provider) >= 1);
        }
    }

    #[test]
    fn counts_word_classes() {
        // "Hello" (1 word group) + "," + "world" + "!" = 1.3 + 1 + 1.3 + 1 = 4.6 * 1.1
        assert_eq!(estimate("Hello, world!", ProviderKind::OpenAI), 6);
        // 12 letters = 2 groups of 8
        assert_eq!(estimate("abcdefghijkl", ProviderKind::OpenAI), 3);
        // "12345" = 2 groups of 3 digits
        assert_eq!(estimate("12345", ProviderKind::Gemini), 3);
    }

    #[test]
    fn non_ascii_costs_more_than_words() {
        let ascii = estimate("abcd", ProviderKind::Anthropic);
        let cjk = estimate("你好世界", ProviderKind::Anthropic);
        assert!(cjk > ascii * 4);
    }

    #[test]
    fn provider_weights_differ() {
        let text = "The quick brown fox jumps over the lazy dog ".repeat(4);
        let openai = estimate(&text, ProviderKind::OpenAI);
        let anthropic = estimate(&text, ProviderKind::Anthropic);
        let gemini = estimate(&text, ProviderKind::Gemini);
        assert!(anthropic > openai);
        assert!(openai > gemini);
    }

    #[test]
    fn estimate_is_monotonic_when_text_grows() {
        let mut text = String::new();
        let mut last = 0;
        for i in 0..500 {
            text.push_str(["word ", "42 ", "?! ", "é", "x"][i % 5]);
            let current = estimate(&text, ProviderKind::OpenAI);
            assert!(current >= last, "estimate dropped at step {}", i);
            last = current;
        }
    }

    #[test]
    fn monotonic_across_long_text_threshold() {
        let base = "ab ".repeat(LONG_TEXT_THRESHOLD / 3);
        let mut text = base.clone();
        let mut last = estimate(&text, ProviderKind::Anthropic);
        for _ in 0..20 {
            text.push_str("ab ");
            let current = estimate(&text, ProviderKind::Anthropic);
            assert!(current >= last);
            last = current;
        }
        assert!(text.chars().count() > LONG_TEXT_THRESHOLD);
    }

    #[test]
    fn long_text_uses_ratio_for_remainder() {
        let text = "a".repeat(LONG_TEXT_THRESHOLD + 4_000);
        // head: 20000 letters in one run = 2500 groups * 1.3; tail: 4000 / 4
        let expected = ((2500.0 * 1.3 + 1000.0) * SAFETY_MARGIN).ceil() as u32;
        assert_eq!(estimate(&text, ProviderKind::OpenAI), expected);
    }

    #[test]
    fn turn_with_image_adds_surcharge() {
        let plain = Turn::user("describe this");
        let with_image = plain
            .clone()
            .with_image(ImageAttachment::new("aGVsbG8=", "image/png"));

        for provider in ProviderKind::ALL {
            assert_eq!(
                estimate_turn(&with_image, provider),
                estimate_turn(&plain, provider) + image_tokens(provider)
            );
        }
        assert_eq!(image_tokens(ProviderKind::OpenAI), 765);
        assert_eq!(image_tokens(ProviderKind::Anthropic), 1600);
        assert_eq!(image_tokens(ProviderKind::Gemini), 258);
    }

    #[test]
    fn estimate_turns_sums_turns() {
        let turns = vec![Turn::user("hi there"), Turn::assistant("hello!")];
        let total = estimate_turns(&turns, ProviderKind::Gemini);
        assert_eq!(
            total,
            estimate("hi there", ProviderKind::Gemini) + estimate("hello!", ProviderKind::Gemini)
        );
    }
}
