//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// The referenced row does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Row kind, e.g. "heuristic".
        kind: &'static str,
        id: String,
    },

    /// The fire already has a terminal outcome.
    #[error("fire '{0}' already resolved")]
    AlreadyResolved(String),

    /// The heuristic is frozen and accepts no confidence updates.
    #[error("heuristic '{0}' is frozen")]
    Frozen(String),

    /// Input failed domain validation.
    #[error("validation failed: {0}")]
    Validation(#[from] gladys_core::CoreError),

    /// The database could not be reached.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// A query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// A persisted row could not be decoded.
    #[error("corrupt row '{id}': {reason}")]
    CorruptRow { id: String, reason: String },
}

impl StorageError {
    /// Transient failures worth retrying at the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Connection-level failures (closed socket, refused) are
        // retryable; everything else is a query problem.
        if err.is_closed() {
            Self::Connection(err.to_string())
        } else {
            Self::Query(err.to_string())
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StorageError::NotFound {
            kind: "heuristic",
            id: "h-42".to_string(),
        };
        assert_eq!(err.to_string(), "heuristic 'h-42' not found");
    }

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(StorageError::Connection("refused".to_string()).is_retryable());
        assert!(!StorageError::Query("syntax".to_string()).is_retryable());
        assert!(!StorageError::AlreadyResolved("f-1".to_string()).is_retryable());
        assert!(!StorageError::Frozen("h-1".to_string()).is_retryable());
    }
}
