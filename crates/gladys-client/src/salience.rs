//! Client for the Salience Gateway service.

use std::time::Duration;

use gladys_core::retry::with_retry;
use gladys_core::{Event, Heuristic, RequestMeta, SalienceVector};
use gladys_proto::v1::{
    self, salience_gateway_client::SalienceGatewayClient, EvaluateSalienceRequest,
    NotifyHeuristicChangeRequest,
};
use tonic::transport::{Channel, Endpoint};

use crate::{traced_request, ClientConfig, ClientError, Result};

/// What a heuristic change notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicChange {
    Created,
    Updated,
    Deleted,
}

impl From<HeuristicChange> for v1::HeuristicChangeType {
    fn from(c: HeuristicChange) -> Self {
        match c {
            HeuristicChange::Created => Self::Created,
            HeuristicChange::Updated => Self::Updated,
            HeuristicChange::Deleted => Self::Deleted,
        }
    }
}

/// Result of a salience evaluation.
#[derive(Debug, Clone)]
pub struct SalienceEvaluation {
    pub salience: SalienceVector,
    pub from_cache: bool,
    pub matched_heuristic_id: Option<String>,
    /// Canonical action text of the matched heuristic.
    pub matched_action: Option<String>,
    pub match_similarity: f64,
    /// Populated when the gateway degraded (e.g. storage down) but still
    /// produced a usable default vector.
    pub error_message: Option<String>,
}

/// Typed client for the Salience Gateway.
#[derive(Clone)]
pub struct SalienceClient {
    client: SalienceGatewayClient<Channel>,
    config: ClientConfig,
}

impl std::fmt::Debug for SalienceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalienceClient")
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

impl SalienceClient {
    /// Build a lazily connecting client. The fast path budget is tight,
    /// so the default deadline is overridden to 500ms unless the config
    /// says otherwise.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.address.clone())
            .map_err(|_| ClientError::InvalidEndpoint(config.address.clone()))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(Self {
            client: SalienceGatewayClient::new(channel),
            config,
        })
    }

    /// Score one event. Retried on transient failures within the caller's
    /// salience budget; the orchestrator falls back to a default vector
    /// when this errors.
    pub async fn evaluate(&self, event: &Event) -> Result<SalienceEvaluation> {
        let meta = &event.meta;
        let response = with_retry(&self.config.retry, ClientError::is_retryable, || {
            let mut client = self.client.clone();
            let request = EvaluateSalienceRequest {
                meta: Some(meta.clone().into()),
                event_id: event.id.clone(),
                source: event.source.clone(),
                raw_text: event.raw_text.clone(),
                structured_json: event
                    .structured
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                entity_ids: event.entity_ids.clone(),
            };
            let timeout = self.config.request_timeout;
            async move {
                client
                    .evaluate_salience(traced_request(request, meta, timeout))
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await?
        .into_inner();

        let salience = response
            .salience
            .map(SalienceVector::from)
            .ok_or_else(|| ClientError::InvalidResponse("missing salience vector".to_string()))?;

        Ok(SalienceEvaluation {
            salience,
            from_cache: response.from_cache,
            matched_heuristic_id: if response.matched_heuristic_id.is_empty() {
                None
            } else {
                Some(response.matched_heuristic_id)
            },
            matched_action: if response.matched_action.is_empty() {
                None
            } else {
                Some(response.matched_action)
            },
            match_similarity: response.match_similarity,
            error_message: if response.error_message.is_empty() {
                None
            } else {
                Some(response.error_message)
            },
        })
    }

    /// Tell the gateway a heuristic changed. Best-effort by contract;
    /// callers typically run this through `spawn_logged`.
    pub async fn notify_heuristic_change(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        change: HeuristicChange,
        heuristic: Option<Heuristic>,
    ) -> Result<()> {
        let request = NotifyHeuristicChangeRequest {
            meta: Some(meta.clone().into()),
            heuristic_id: heuristic_id.to_string(),
            change_type: v1::HeuristicChangeType::from(change) as i32,
            heuristic: heuristic.map(Into::into),
        };
        let mut client = self.client.clone();
        client
            .notify_heuristic_change(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?;
        Ok(())
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
