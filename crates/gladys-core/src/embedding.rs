//! The embedder seam.
//!
//! The embedding model itself is an external collaborator; the core only
//! depends on this trait. The Memory Store owns the concrete backend and
//! serves `GenerateEmbedding` to everyone else.

use async_trait::async_trait;
use thiserror::Error;

/// Default embedding dimensionality (all-MiniLM class models).
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Errors from embedding generation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EmbedError {
    /// The backend could not be reached.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something unusable.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// The produced vector had the wrong dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbedError {
    /// Transient failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Text → fixed-dimension vector. Deterministic per (model id, text).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Dimensionality every produced vector must have.
    fn dimension(&self) -> usize;

    /// Identifier of the backing model, recorded for provenance.
    fn model_id(&self) -> &str;
}

/// Check a produced vector against the expected dimension.
pub fn check_dimension(embedding: &[f32], expected: usize) -> Result<(), EmbedError> {
    if embedding.len() == expected {
        Ok(())
    } else {
        Err(EmbedError::DimensionMismatch {
            expected,
            got: embedding.len(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_dimension_accepts_exact_match() {
        assert!(check_dimension(&[0.0; 384], 384).is_ok());
        assert!(check_dimension(&[0.0; 3], 384).is_err());
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(EmbedError::Unavailable("conn refused".to_string()).is_retryable());
        assert!(!EmbedError::InvalidResponse("empty".to_string()).is_retryable());
        assert!(!EmbedError::DimensionMismatch {
            expected: 384,
            got: 768
        }
        .is_retryable());
    }
}
