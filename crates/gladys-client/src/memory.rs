//! Client for the Memory Storage service.

use std::time::Duration;

use gladys_core::event::EpisodicEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::retry::with_retry;
use gladys_core::{Heuristic, RequestMeta};
use gladys_proto::convert::feedback_source_to_wire;
use gladys_proto::v1::{
    self, memory_storage_client::MemoryStorageClient, GenerateEmbeddingRequest, GetEpisodeRequest,
    QueryMatchingHeuristicsRequest, RecordFeedbackEventRequest, RecordHeuristicFireRequest,
    ResolveHeuristicFireRequest, StoreEpisodeRequest, StoreHeuristicRequest,
    UpdateHeuristicConfidenceRequest,
};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::{traced_request, ClientConfig, ClientError, Result};

/// Updated pseudo-counts after a confidence update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceUpdate {
    pub alpha: f64,
    pub beta: f64,
    pub confidence: f64,
}

/// Typed client for the Memory Storage service.
///
/// The channel connects lazily, so construction never blocks on the
/// service being up; transient failures surface per call and retry under
/// the configured policy where the operation is idempotent.
#[derive(Clone)]
pub struct MemoryClient {
    client: MemoryStorageClient<Channel>,
    config: ClientConfig,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

impl MemoryClient {
    /// Build a lazily connecting client for the given config.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.address.clone())
            .map_err(|_| ClientError::InvalidEndpoint(config.address.clone()))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(Self {
            client: MemoryStorageClient::new(channel),
            config,
        })
    }

    /// Store an episodic event. Idempotent on the event id; retried on
    /// transient failures.
    pub async fn store_episode(&self, meta: &RequestMeta, episode: EpisodicEvent) -> Result<()> {
        let wire: v1::EpisodicEvent = episode.into();
        let response = with_retry(&self.config.retry, ClientError::is_retryable, || {
            let mut client = self.client.clone();
            let request = StoreEpisodeRequest {
                meta: Some(meta.clone().into()),
                episode: Some(wire.clone()),
            };
            let timeout = self.config.request_timeout;
            async move {
                client
                    .store_episode(traced_request(request, meta, timeout))
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await?
        .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(())
    }

    /// Fetch one episode by its event id.
    pub async fn get_episode(
        &self,
        meta: &RequestMeta,
        event_id: &str,
    ) -> Result<Option<EpisodicEvent>> {
        let response = with_retry(&self.config.retry, ClientError::is_retryable, || {
            let mut client = self.client.clone();
            let request = GetEpisodeRequest {
                meta: Some(meta.clone().into()),
                event_id: event_id.to_string(),
            };
            let timeout = self.config.request_timeout;
            async move {
                client
                    .get_episode(traced_request(request, meta, timeout))
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await?
        .into_inner();

        if !response.found {
            return Ok(None);
        }
        Ok(response.episode.map(Into::into))
    }

    /// Generate an embedding for the given text.
    pub async fn generate_embedding(&self, meta: &RequestMeta, text: &str) -> Result<Vec<f32>> {
        let response = with_retry(&self.config.retry, ClientError::is_retryable, || {
            let mut client = self.client.clone();
            let request = GenerateEmbeddingRequest {
                meta: Some(meta.clone().into()),
                text: text.to_string(),
            };
            let timeout = self.config.request_timeout;
            async move {
                client
                    .generate_embedding(traced_request(request, meta, timeout))
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await?
        .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        if response.embedding.is_empty() {
            return Err(ClientError::InvalidResponse(
                "empty embedding".to_string(),
            ));
        }
        Ok(response.embedding)
    }

    /// Vector search for heuristics matching the event embedding. Pass
    /// `raw_text` instead of an embedding to let the server embed,
    /// the storage-only path used when gateway-side embedding fails.
    /// Entries that fail domain conversion are logged and skipped.
    pub async fn query_matching_heuristics(
        &self,
        meta: &RequestMeta,
        event_embedding: &[f32],
        raw_text: Option<&str>,
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>> {
        let response = with_retry(&self.config.retry, ClientError::is_retryable, || {
            let mut client = self.client.clone();
            let request = QueryMatchingHeuristicsRequest {
                meta: Some(meta.clone().into()),
                event_embedding: event_embedding.to_vec(),
                raw_text: raw_text.unwrap_or_default().to_string(),
                source: source.unwrap_or_default().to_string(),
                min_similarity,
                min_confidence,
                limit,
            };
            let timeout = self.config.request_timeout;
            async move {
                client
                    .query_matching_heuristics(traced_request(request, meta, timeout))
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await?
        .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }

        let mut matches = Vec::with_capacity(response.matches.len());
        for m in response.matches {
            let Some(wire) = m.heuristic else {
                warn!("skipping heuristic match with no heuristic body");
                continue;
            };
            if wire.id.is_empty() {
                warn!("skipping heuristic match with empty id");
                continue;
            }
            matches.push((Heuristic::from(wire), m.similarity));
        }
        debug!(count = matches.len(), "matching heuristics returned");
        Ok(matches)
    }

    /// Persist a heuristic, optionally generating its condition embedding
    /// server-side. Returns the stored heuristic id.
    pub async fn store_heuristic(
        &self,
        meta: &RequestMeta,
        heuristic: Heuristic,
        generate_embedding: bool,
    ) -> Result<String> {
        let request = StoreHeuristicRequest {
            meta: Some(meta.clone().into()),
            heuristic: Some(heuristic.into()),
            generate_embedding,
        };
        let mut client = self.client.clone();
        let response = client
            .store_heuristic(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(response.heuristic_id)
    }

    /// Apply one weighted Beta-Binomial observation. Not retried; the
    /// update is not idempotent.
    pub async fn update_heuristic_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<ConfidenceUpdate> {
        let request = UpdateHeuristicConfidenceRequest {
            meta: Some(meta.clone().into()),
            heuristic_id: heuristic_id.to_string(),
            positive,
            feedback_source: feedback_source_to_wire(feedback_source) as i32,
            weight,
        };
        let mut client = self.client.clone();
        let response = client
            .update_heuristic_confidence(traced_request(
                request,
                meta,
                self.config.request_timeout,
            ))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(ConfidenceUpdate {
            alpha: response.alpha,
            beta: response.beta,
            confidence: response.confidence,
        })
    }

    /// Delete a heuristic.
    pub async fn delete_heuristic(&self, meta: &RequestMeta, heuristic_id: &str) -> Result<()> {
        let request = v1::DeleteHeuristicRequest {
            meta: Some(meta.clone().into()),
            heuristic_id: heuristic_id.to_string(),
        };
        let mut client = self.client.clone();
        let response = client
            .delete_heuristic(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(())
    }

    /// Append a heuristic-fire audit row. Returns the fire id.
    pub async fn record_heuristic_fire(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        event_id: &str,
        episodic_event_id: Option<&str>,
    ) -> Result<String> {
        let request = RecordHeuristicFireRequest {
            meta: Some(meta.clone().into()),
            heuristic_id: heuristic_id.to_string(),
            event_id: event_id.to_string(),
            episodic_event_id: episodic_event_id.unwrap_or_default().to_string(),
        };
        let mut client = self.client.clone();
        let response = client
            .record_heuristic_fire(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(response.fire_id)
    }

    /// Resolve a fire to its terminal outcome. First resolution wins.
    pub async fn resolve_heuristic_fire(
        &self,
        meta: &RequestMeta,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<()> {
        let request = ResolveHeuristicFireRequest {
            meta: Some(meta.clone().into()),
            fire_id: fire_id.to_string(),
            outcome: v1::FireOutcome::from(outcome) as i32,
            feedback_source: feedback_source_to_wire(feedback_source) as i32,
        };
        let mut client = self.client.clone();
        let response = client
            .resolve_heuristic_fire(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(())
    }

    /// Record a normalized feedback event.
    pub async fn record_feedback_event(
        &self,
        meta: &RequestMeta,
        feedback: gladys_core::feedback::FeedbackEvent,
    ) -> Result<String> {
        let request = RecordFeedbackEventRequest {
            meta: Some(meta.clone().into()),
            feedback: Some(feedback.into()),
        };
        let mut client = self.client.clone();
        let response = client
            .record_feedback_event(traced_request(request, meta, self.config.request_timeout))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        if !response.error_message.is_empty() {
            return Err(ClientError::Rejected(response.error_message));
        }
        Ok(response.feedback_id)
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
