//! Salience Gateway.
//!
//! The fast path of the GLADyS learning loop: events are matched against
//! cached heuristic condition embeddings in-memory, falling back to the
//! Memory Store on a miss. A match boosts the event's salience vector and
//! names the heuristic; no match yields the default vector. The cache is
//! never authoritative: invalidation notifications from the Memory
//! Store reconcile it after heuristic mutations.

pub mod cache;
pub mod novelty;
pub mod service;

pub use cache::{CacheStatsSnapshot, HeuristicCache};
pub use novelty::EventMemory;
pub use service::{HeuristicSource, SalienceService};

use std::time::Duration;

use gladys_core::env;

/// Model id stamped on vectors produced by this gateway.
pub const GATEWAY_MODEL_ID: &str = "salience-gateway/v1";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct SalienceConfig {
    /// Global floor on match similarity; each heuristic's own threshold
    /// can only raise it.
    pub min_similarity: f64,
    /// Floor on heuristic confidence for matching.
    pub min_confidence: f64,
    /// Novelty assigned when no embedding is available.
    pub fallback_novelty: f64,
    /// Heuristic cache capacity.
    pub cache_capacity: usize,
    /// Heuristic cache TTL; `None` disables TTL expiry.
    pub cache_ttl: Option<Duration>,
    /// Similarity to a remembered event above which habituation kicks in.
    pub novelty_threshold: f64,
    /// FIFO event-memory size for novelty detection.
    pub event_memory_size: usize,
    /// Candidates requested from storage on a cache miss.
    pub storage_fetch_limit: u32,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.6,
            min_confidence: 0.5,
            fallback_novelty: 0.5,
            cache_capacity: 50,
            cache_ttl: None,
            novelty_threshold: 0.85,
            event_memory_size: 100,
            storage_fetch_limit: 10,
        }
    }
}

impl SalienceConfig {
    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ttl_ms = env::env_u64_or_default(env::CACHE_HEURISTIC_TTL_MS, 0);
        Self {
            min_similarity: env::env_f64_or_default(
                env::SALIENCE_MIN_HEURISTIC_SIMILARITY,
                defaults.min_similarity,
            ),
            min_confidence: env::env_f64_or_default(
                env::SALIENCE_MIN_HEURISTIC_CONFIDENCE,
                defaults.min_confidence,
            ),
            fallback_novelty: env::env_f64_or_default(
                env::SALIENCE_FALLBACK_NOVELTY,
                defaults.fallback_novelty,
            ),
            cache_capacity: env::env_usize_or_default(
                env::CACHE_MAX_HEURISTICS,
                defaults.cache_capacity,
            ),
            cache_ttl: (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms)),
            novelty_threshold: env::env_f64_or_default(
                env::CACHE_NOVELTY_THRESHOLD,
                defaults.novelty_threshold,
            ),
            event_memory_size: env::env_usize_or_default(
                env::CACHE_EVENT_MEMORY_SIZE,
                defaults.event_memory_size,
            ),
            storage_fetch_limit: defaults.storage_fetch_limit,
        }
    }
}
