//! Client-side error types.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors from calls into a GLADyS service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// gRPC transport error.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status error.
    #[error("gRPC status error: {0}")]
    Status(Box<tonic::Status>),

    /// The service processed the request but rejected it.
    #[error("rejected by service: {0}")]
    Rejected(String),

    /// The service answered with something unusable.
    #[error("invalid response from service: {0}")]
    InvalidResponse(String),

    /// The configured endpoint could not be parsed.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl ClientError {
    /// Transient failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            _ => false,
        }
    }
}

impl From<tonic::Status> for ClientError {
    fn from(status: tonic::Status) -> Self {
        Self::Status(Box::new(status))
    }
}
