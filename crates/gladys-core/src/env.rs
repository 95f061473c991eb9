//! Centralized environment variable names and typed helpers.
//!
//! Every binary reads configuration through these constants so names stay
//! consistent across services.

// =============================================================================
// Environment Variable Name Constants
// =============================================================================

/// Orchestrator gRPC listen port (default: 50050).
pub const ORCHESTRATOR_PORT: &str = "ORCHESTRATOR_PORT";
/// Salience gateway gRPC listen port (default: 50052).
pub const SALIENCE_PORT: &str = "SALIENCE_PORT";
/// Memory store gRPC listen port (default: 50051).
pub const MEMORY_PORT: &str = "MEMORY_PORT";
/// Executive gRPC listen port (default: 50053).
pub const EXECUTIVE_PORT: &str = "EXECUTIVE_PORT";

/// Salience gateway address, e.g. "http://localhost:50052".
pub const SALIENCE_ADDRESS: &str = "SALIENCE_ADDRESS";
/// Executive address, e.g. "http://localhost:50053".
pub const EXECUTIVE_ADDRESS: &str = "EXECUTIVE_ADDRESS";
/// Memory store address, e.g. "http://localhost:50051".
pub const MEMORY_ADDRESS: &str = "MEMORY_ADDRESS";

/// PostgreSQL connection string. Unset selects the in-memory backend.
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Ollama-compatible HTTP endpoint for embeddings and chat.
pub const OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
/// Embedding model name (default: all-minilm).
pub const EMBEDDING_MODEL: &str = "EMBEDDING_MODEL";
/// Embedding dimensionality (default: 384).
pub const EMBEDDING_DIM: &str = "EMBEDDING_DIM";
/// Chat model name for slow-path deliberation (default: llama3).
pub const LLM_MODEL: &str = "LLM_MODEL";

/// Heuristic cache TTL in milliseconds; 0 disables TTL expiry.
pub const CACHE_HEURISTIC_TTL_MS: &str = "CACHE_HEURISTIC_TTL_MS";
/// Heuristic cache capacity (default: 50).
pub const CACHE_MAX_HEURISTICS: &str = "CACHE_MAX_HEURISTICS";
/// Cosine similarity above which a recent event damps novelty (default: 0.85).
pub const CACHE_NOVELTY_THRESHOLD: &str = "CACHE_NOVELTY_THRESHOLD";
/// FIFO event-memory size for novelty detection (default: 100).
pub const CACHE_EVENT_MEMORY_SIZE: &str = "CACHE_EVENT_MEMORY_SIZE";

/// Global floor on heuristic match similarity (default: 0.6).
pub const SALIENCE_MIN_HEURISTIC_SIMILARITY: &str = "SALIENCE_MIN_HEURISTIC_SIMILARITY";
/// Floor on heuristic confidence for matching (default: 0.5).
pub const SALIENCE_MIN_HEURISTIC_CONFIDENCE: &str = "SALIENCE_MIN_HEURISTIC_CONFIDENCE";
/// Aggregate salience at or above which events take the slow path (default: 0.7).
pub const SALIENCE_HIGH_THRESHOLD: &str = "SALIENCE_HIGH_THRESHOLD";
/// Novelty assigned when the gateway is unreachable or nothing matches (default: 0.5).
pub const SALIENCE_FALLBACK_NOVELTY: &str = "SALIENCE_FALLBACK_NOVELTY";

/// Priority queue capacity (default: 1024).
pub const QUEUE_CAPACITY: &str = "QUEUE_CAPACITY";
/// Deadline for matching a heuristic fire to feedback (default: 60000).
pub const OUTCOME_DEADLINE_MS: &str = "OUTCOME_DEADLINE_MS";
/// Heartbeat silence after which a component is marked dead (default: 30000).
pub const HEARTBEAT_DEAD_AFTER_MS: &str = "HEARTBEAT_DEAD_AFTER_MS";
/// Interval between batch drains of low-salience events (default: 30000).
pub const MOMENT_FLUSH_MS: &str = "MOMENT_FLUSH_MS";

/// Prior pseudo-counts for freshly extracted heuristics (defaults: 1.0).
pub const EXTRACTION_PRIOR_ALPHA: &str = "EXTRACTION_PRIOR_ALPHA";
/// See [`EXTRACTION_PRIOR_ALPHA`].
pub const EXTRACTION_PRIOR_BETA: &str = "EXTRACTION_PRIOR_BETA";

// =============================================================================
// Typed helpers
// =============================================================================

/// Reads an environment variable as a string, returning `None` if unset.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads an environment variable as a string, returning `default` if unset.
#[must_use]
pub fn env_string_or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads an environment variable as a `u16`, returning `default` if unset or invalid.
#[must_use]
pub fn env_u16_or_default(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as a `u64`, returning `default` if unset or invalid.
#[must_use]
pub fn env_u64_or_default(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as a `usize`, returning `default` if unset or invalid.
#[must_use]
pub fn env_usize_or_default(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as an `f64`, returning `default` if unset or invalid.
#[must_use]
pub fn env_f64_or_default(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}
