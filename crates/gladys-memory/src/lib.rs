//! Memory Store service.
//!
//! Wraps a [`gladys_storage::StorageBackend`] with embedding generation
//! and cache-invalidation notifications toward the Salience Gateway.
//! Everything persisted in GLADyS flows through this service; the
//! gateway and executive never touch the database directly.

pub mod embedder;
pub mod service;

pub use embedder::OllamaEmbedder;
pub use service::{InvalidationSink, MemoryService};

use gladys_core::env;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Embedding dimensionality enforced on every stored vector.
    pub embedding_dim: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dim: gladys_core::DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl MemoryConfig {
    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            embedding_dim: env::env_usize_or_default(
                env::EMBEDDING_DIM,
                gladys_core::DEFAULT_EMBEDDING_DIM,
            ),
        }
    }
}
