//! Shared error kinds for domain-level operations.

use thiserror::Error;

/// Errors produced by domain-type construction and validation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A field failed validation (out of range, wrong dimension, ...).
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An identifier could not be parsed as a UUID.
    #[error("invalid uuid '{0}'")]
    InvalidUuid(String),

    /// A JSON payload could not be parsed.
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// An embedding had the wrong dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension of the offending vector.
        got: usize,
    },
}

impl CoreError {
    /// Shorthand for an invalid-field error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
