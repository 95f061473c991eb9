//! Client for the Executive (decision/learning) service.

use std::time::Duration;

use gladys_core::{Event, RequestMeta};
use gladys_proto::v1::{
    self, executive_client::ExecutiveClient as WireClient, ProcessEventRequest,
    ProcessMomentRequest, ProvideFeedbackRequest,
};
use tonic::transport::{Channel, Endpoint};

use crate::{traced_request, ClientConfig, ClientError, Result};

/// Slow-path deliberation result.
#[derive(Debug, Clone)]
pub struct Deliberation {
    pub response_id: String,
    pub response_text: String,
    pub predicted_success: f64,
    pub prediction_confidence: f64,
    /// Non-empty when the executive degraded (e.g. `llm_unavailable`).
    pub error_message: Option<String>,
}

/// Feedback handling result.
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub extracted_heuristic_id: Option<String>,
    pub updated_heuristic_id: Option<String>,
    pub error_message: Option<String>,
}

/// Typed client for the Executive service.
#[derive(Clone)]
pub struct ExecutiveClient {
    client: WireClient<Channel>,
    config: ClientConfig,
}

impl std::fmt::Debug for ExecutiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutiveClient")
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl ExecutiveClient {
    /// Build a lazily connecting client. Slow-path calls carry a 10s
    /// deadline by default.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.address.clone())
            .map_err(|_| ClientError::InvalidEndpoint(config.address.clone()))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(Self {
            client: WireClient::new(channel),
            config,
        })
    }

    /// Deliberate over one event. Not retried; the LLM call is neither
    /// cheap nor idempotent.
    pub async fn process_event(&self, event: Event, immediate: bool) -> Result<Deliberation> {
        let meta = event.meta.clone();
        let request = ProcessEventRequest {
            meta: Some(meta.clone().into()),
            event: Some(event.into()),
            immediate,
        };
        let mut client = self.client.clone();
        let response = client
            .process_event(traced_request(request, &meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        Ok(Deliberation {
            response_id: response.response_id,
            response_text: response.response_text,
            predicted_success: response.predicted_success,
            prediction_confidence: response.prediction_confidence,
            error_message: none_if_empty(response.error_message),
        })
    }

    /// Deliberate over an ordered batch of low-salience events.
    pub async fn process_moment(
        &self,
        meta: &RequestMeta,
        events: Vec<Event>,
    ) -> Result<Deliberation> {
        let request = ProcessMomentRequest {
            meta: Some(meta.clone().into()),
            events: events.into_iter().map(Into::into).collect(),
        };
        let mut client = self.client.clone();
        let response = client
            .process_moment(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        Ok(Deliberation {
            response_id: response.response_id,
            response_text: response.response_text,
            predicted_success: 0.0,
            prediction_confidence: 0.0,
            error_message: none_if_empty(response.error_message),
        })
    }

    /// Forward user/outcome feedback for an event.
    pub async fn provide_feedback(
        &self,
        meta: &RequestMeta,
        event_id: &str,
        positive: bool,
        response_id: Option<&str>,
    ) -> Result<FeedbackOutcome> {
        let request = ProvideFeedbackRequest {
            meta: Some(meta.clone().into()),
            event_id: event_id.to_string(),
            positive,
            response_id: response_id.unwrap_or_default().to_string(),
        };
        let mut client = self.client.clone();
        let response = client
            .provide_feedback(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        Ok(FeedbackOutcome {
            extracted_heuristic_id: none_if_empty(response.extracted_heuristic_id),
            updated_heuristic_id: none_if_empty(response.updated_heuristic_id),
            error_message: none_if_empty(response.error_message),
        })
    }

    /// Liveness probe.
    pub async fn health(&self, meta: &RequestMeta) -> Result<bool> {
        let request = v1::HealthRequest {
            service: String::new(),
        };
        let mut client = self.client.clone();
        let response = client
            .health(traced_request(request, meta, Duration::from_secs(2)))
            .await
            .map_err(ClientError::from)?
            .into_inner();
        Ok(response.status == v1::health_response::Status::Serving as i32)
    }
}
