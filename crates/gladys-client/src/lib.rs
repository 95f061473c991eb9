//! Typed async clients for the GLADyS core services.
//!
//! Each client wraps the tonic-generated stub with lazy connection,
//! per-RPC deadlines, trace-id propagation, and bounded retry on
//! transient transport failures. Sensors and subsystems talk to the
//! orchestrator over the raw generated stubs; these wrappers cover the
//! service-to-service paths inside the core.

pub mod error;
pub mod executive;
pub mod memory;
pub mod salience;

pub use error::{ClientError, Result};
pub use executive::ExecutiveClient;
pub use memory::MemoryClient;
pub use salience::SalienceClient;

use std::time::Duration;

use gladys_core::RequestMeta;
use gladys_proto::TRACE_ID_HEADER;
use tonic::Request;

/// Per-service connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint, e.g. "<http://localhost:50051>".
    pub address: String,
    /// Default deadline applied to every RPC unless a method overrides it.
    pub request_timeout: Duration,
    /// Retry policy for transient transport failures.
    pub retry: gladys_core::retry::RetryPolicy,
}

impl ClientConfig {
    /// Config for the given address with a 5s default deadline.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            request_timeout: Duration::from_secs(5),
            retry: gladys_core::retry::RetryPolicy::default(),
        }
    }

    /// Override the default per-RPC deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: gladys_core::retry::RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Build a request with a deadline and the propagated trace id.
pub(crate) fn traced_request<T>(message: T, meta: &RequestMeta, timeout: Duration) -> Request<T> {
    let mut request = Request::new(message);
    request.set_timeout(timeout);
    if !meta.trace_id.is_empty() {
        if let Ok(value) = meta.trace_id.parse() {
            request.metadata_mut().insert(TRACE_ID_HEADER, value);
        }
    }
    request
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traced_request_carries_deadline_and_trace_id() {
        let meta = RequestMeta {
            trace_id: "trace-abc-123".to_string(),
            ..RequestMeta::internal("test")
        };
        let request = traced_request((), &meta, Duration::from_millis(500));
        assert_eq!(
            request.metadata().get(TRACE_ID_HEADER).unwrap(),
            "trace-abc-123"
        );
    }

    #[test]
    fn empty_trace_id_sets_no_header() {
        let meta = RequestMeta::default();
        let request = traced_request((), &meta, Duration::from_secs(1));
        assert!(request.metadata().get(TRACE_ID_HEADER).is_none());
    }
}
