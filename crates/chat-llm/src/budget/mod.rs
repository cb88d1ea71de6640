//! Token budget management.
//!
//! - [`estimator`]: provider-aware token estimation
//! - [`limits`]: provider context windows and the usable budget
//! - [`trimmer`]: recency-biased history trimming within the budget

pub mod estimator;
pub mod limits;
pub mod trimmer;

pub use estimator::{
    estimate, estimate_turn, estimate_turns, image_tokens, TokenCounter, TokenEstimator,
    TokenWeights,
};
pub use limits::{budget, ContextLimits};
pub use trimmer::{trim, ContextTrimmer, TrimReport};
