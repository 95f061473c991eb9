//! GLADyS decision/learning layer.
//!
//! The executive deliberates over slow-path events with an LLM, extracts
//! reusable heuristics from positive feedback, and downgrades heuristic
//! confidence on negative feedback. Over time the learning loop moves
//! recurring situations off this service and onto the fast path.

pub mod extraction;
pub mod llm;
pub mod service;

pub use llm::{ChatMessage, ChatModel, LlmError, OllamaChat, Role};
pub use service::{ExecutiveService, MemoryAccess};

use gladys_core::env;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ExecutiveConfig {
    /// Wall-clock budget for one LLM call.
    pub llm_timeout: std::time::Duration,
    /// Prior pseudo-counts assigned to freshly extracted heuristics.
    pub extraction_prior_alpha: f64,
    /// See `extraction_prior_alpha`.
    pub extraction_prior_beta: f64,
    /// Cosine similarity at which an extraction is a duplicate of an
    /// existing same-source heuristic.
    pub dedup_similarity: f64,
    /// Weight applied to explicit feedback observations.
    pub explicit_weight: f64,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            llm_timeout: std::time::Duration::from_secs(10),
            extraction_prior_alpha: gladys_core::heuristic::PRIOR_ALPHA,
            extraction_prior_beta: gladys_core::heuristic::PRIOR_BETA,
            dedup_similarity: 0.95,
            explicit_weight: 1.0,
        }
    }
}

impl ExecutiveConfig {
    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            extraction_prior_alpha: env::env_f64_or_default(
                env::EXTRACTION_PRIOR_ALPHA,
                defaults.extraction_prior_alpha,
            ),
            extraction_prior_beta: env::env_f64_or_default(
                env::EXTRACTION_PRIOR_BETA,
                defaults.extraction_prior_beta,
            ),
            ..defaults
        }
    }
}
