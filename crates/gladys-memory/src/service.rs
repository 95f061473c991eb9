//! gRPC service implementation for the Memory Store.

use std::sync::Arc;

use async_trait::async_trait;
use gladys_client::salience::HeuristicChange;
use gladys_core::event::EpisodicEvent;
use gladys_core::task::spawn_logged;
use gladys_core::{Embedder, Heuristic, RequestMeta};
use gladys_proto::convert::feedback_source_from_wire;
use gladys_proto::v1::{
    self, memory_storage_server::MemoryStorage as MemoryStorageService, DeleteHeuristicRequest,
    DeleteHeuristicResponse, GenerateEmbeddingRequest, GenerateEmbeddingResponse,
    GetEpisodeRequest, GetEpisodeResponse, HealthRequest, HealthResponse,
    QueryEpisodesRequest, QueryEpisodesResponse, QueryMatchingHeuristicsRequest,
    QueryMatchingHeuristicsResponse, RecordFeedbackEventRequest, RecordFeedbackEventResponse,
    RecordHeuristicFireRequest, RecordHeuristicFireResponse, ResolveHeuristicFireRequest,
    ResolveHeuristicFireResponse, StoreEpisodeRequest, StoreEpisodeResponse,
    StoreHeuristicRequest, StoreHeuristicResponse, UpdateHeuristicConfidenceRequest,
    UpdateHeuristicConfidenceResponse,
};
use gladys_storage::{StorageBackend, StorageError};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::MemoryConfig;

/// Receiver of heuristic-change notifications (the Salience Gateway in
/// production). Notifications are best-effort: failures are logged, never
/// propagated to the caller that mutated the heuristic.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    async fn notify(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        change: HeuristicChange,
        heuristic: Option<Heuristic>,
    ) -> Result<(), gladys_client::ClientError>;
}

#[async_trait]
impl InvalidationSink for gladys_client::SalienceClient {
    async fn notify(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        change: HeuristicChange,
        heuristic: Option<Heuristic>,
    ) -> Result<(), gladys_client::ClientError> {
        self.notify_heuristic_change(meta, heuristic_id, change, heuristic)
            .await
    }
}

/// The Memory Store service.
pub struct MemoryService {
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn Embedder>,
    sink: Option<Arc<dyn InvalidationSink>>,
    config: MemoryConfig,
}

impl MemoryService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn Embedder>,
        sink: Option<Arc<dyn InvalidationSink>>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            sink,
            config,
        }
    }

    fn meta_of(wire: Option<v1::RequestMeta>) -> RequestMeta {
        wire.map(Into::into).unwrap_or_default()
    }

    /// Fire a best-effort change notification on a background task.
    fn notify_change(
        &self,
        meta: &RequestMeta,
        heuristic_id: String,
        change: HeuristicChange,
        heuristic: Option<Heuristic>,
    ) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let meta = meta.child("memory");
        spawn_logged("notify_heuristic_change", async move {
            sink.notify(&meta, &heuristic_id, change, heuristic).await
        });
    }

    /// Embed text, mapping failures to a response-level error string.
    async fn embed_or_error(&self, text: &str) -> Result<Vec<f32>, String> {
        self.embedder.embed(text).await.map_err(|e| e.to_string())
    }
}

#[tonic::async_trait]
impl MemoryStorageService for MemoryService {
    async fn store_episode(
        &self,
        request: Request<StoreEpisodeRequest>,
    ) -> Result<Response<StoreEpisodeResponse>, Status> {
        let req = request.into_inner();
        let Some(wire) = req.episode else {
            return Ok(Response::new(StoreEpisodeResponse {
                accepted: false,
                error_message: "missing episode".to_string(),
            }));
        };
        let mut episode: EpisodicEvent = wire.into();

        // Populate the embedding when the caller did not. Embedder
        // trouble degrades to an un-embedded episode rather than a
        // rejected write.
        if episode.embedding.is_empty() && !episode.event.raw_text.is_empty() {
            match self.embed_or_error(&episode.event.raw_text).await {
                Ok(embedding) => episode.embedding = embedding,
                Err(err) => {
                    warn!(event_id = %episode.event.id, error = %err, "storing episode without embedding");
                }
            }
        }

        match self.storage.store_episode(episode).await {
            Ok(_) => Ok(Response::new(StoreEpisodeResponse {
                accepted: true,
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(StoreEpisodeResponse {
                accepted: false,
                error_message: e.to_string(),
            })),
        }
    }

    async fn get_episode(
        &self,
        request: Request<GetEpisodeRequest>,
    ) -> Result<Response<GetEpisodeResponse>, Status> {
        let req = request.into_inner();
        match self.storage.get_episode(&req.event_id).await {
            Ok(Some(episode)) => Ok(Response::new(GetEpisodeResponse {
                episode: Some(episode.into()),
                found: true,
                error_message: String::new(),
            })),
            Ok(None) => Ok(Response::new(GetEpisodeResponse {
                episode: None,
                found: false,
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(GetEpisodeResponse {
                episode: None,
                found: false,
                error_message: e.to_string(),
            })),
        }
    }

    async fn query_episodes(
        &self,
        request: Request<QueryEpisodesRequest>,
    ) -> Result<Response<QueryEpisodesResponse>, Status> {
        let req = request.into_inner();
        let source = if req.source.is_empty() {
            None
        } else {
            Some(req.source.as_str())
        };
        let limit = if req.limit == 0 { 50 } else { req.limit as usize };

        if req.query_embedding.is_empty() {
            match self
                .storage
                .query_episodes_by_time(req.start_ms, req.end_ms, source, limit)
                .await
            {
                Ok(episodes) => Ok(Response::new(QueryEpisodesResponse {
                    episodes: episodes.into_iter().map(Into::into).collect(),
                    similarities: Vec::new(),
                    error_message: String::new(),
                })),
                Err(e) => Ok(Response::new(QueryEpisodesResponse {
                    episodes: Vec::new(),
                    similarities: Vec::new(),
                    error_message: e.to_string(),
                })),
            }
        } else {
            match self
                .storage
                .query_episodes_by_similarity(&req.query_embedding, source, limit)
                .await
            {
                Ok(scored) => {
                    let mut episodes = Vec::with_capacity(scored.len());
                    let mut similarities = Vec::with_capacity(scored.len());
                    for (episode, similarity) in scored {
                        episodes.push(episode.into());
                        similarities.push(similarity);
                    }
                    Ok(Response::new(QueryEpisodesResponse {
                        episodes,
                        similarities,
                        error_message: String::new(),
                    }))
                }
                Err(e) => Ok(Response::new(QueryEpisodesResponse {
                    episodes: Vec::new(),
                    similarities: Vec::new(),
                    error_message: e.to_string(),
                })),
            }
        }
    }

    async fn store_heuristic(
        &self,
        request: Request<StoreHeuristicRequest>,
    ) -> Result<Response<StoreHeuristicResponse>, Status> {
        let req = request.into_inner();
        let meta = Self::meta_of(req.meta.clone());
        let Some(wire) = req.heuristic else {
            return Ok(Response::new(StoreHeuristicResponse {
                accepted: false,
                heuristic_id: String::new(),
                error_message: "missing heuristic".to_string(),
            }));
        };
        let mut heuristic: Heuristic = wire.into();

        if heuristic.condition_embedding.is_empty() {
            if req.generate_embedding && !heuristic.condition.text.is_empty() {
                match self.embed_or_error(&heuristic.condition.text).await {
                    Ok(embedding) => heuristic.condition_embedding = embedding,
                    Err(err) => {
                        // Without a condition embedding the heuristic can
                        // never match; reject rather than store dead weight.
                        return Ok(Response::new(StoreHeuristicResponse {
                            accepted: false,
                            heuristic_id: String::new(),
                            error_message: format!("embedding generation failed: {err}"),
                        }));
                    }
                }
            }
        } else if heuristic.condition_embedding.len() != self.config.embedding_dim {
            return Ok(Response::new(StoreHeuristicResponse {
                accepted: false,
                heuristic_id: String::new(),
                error_message: format!(
                    "condition embedding has dimension {}, expected {}",
                    heuristic.condition_embedding.len(),
                    self.config.embedding_dim
                ),
            }));
        }

        match self.storage.store_heuristic(heuristic.clone()).await {
            Ok(id) => {
                info!(heuristic_id = %id, name = %heuristic.name, "heuristic stored");
                self.notify_change(&meta, id.clone(), HeuristicChange::Created, Some(heuristic));
                Ok(Response::new(StoreHeuristicResponse {
                    accepted: true,
                    heuristic_id: id,
                    error_message: String::new(),
                }))
            }
            Err(e) => Ok(Response::new(StoreHeuristicResponse {
                accepted: false,
                heuristic_id: String::new(),
                error_message: e.to_string(),
            })),
        }
    }

    async fn update_heuristic_confidence(
        &self,
        request: Request<UpdateHeuristicConfidenceRequest>,
    ) -> Result<Response<UpdateHeuristicConfidenceResponse>, Status> {
        let req = request.into_inner();
        let meta = Self::meta_of(req.meta.clone());
        // Lenient default: absent or out-of-range weight means a full
        // observation.
        let weight = if req.weight > 0.0 && req.weight <= 1.0 {
            req.weight
        } else {
            1.0
        };

        match self
            .storage
            .update_heuristic_confidence(&req.heuristic_id, req.positive, weight)
            .await
        {
            Ok(counts) => {
                debug!(
                    heuristic_id = %req.heuristic_id,
                    positive = req.positive,
                    confidence = counts.confidence,
                    "confidence updated"
                );
                let updated = self
                    .storage
                    .get_heuristic(&req.heuristic_id)
                    .await
                    .ok()
                    .flatten();
                self.notify_change(
                    &meta,
                    req.heuristic_id.clone(),
                    HeuristicChange::Updated,
                    updated,
                );
                Ok(Response::new(UpdateHeuristicConfidenceResponse {
                    accepted: true,
                    alpha: counts.alpha,
                    beta: counts.beta,
                    confidence: counts.confidence,
                    error_message: String::new(),
                }))
            }
            // Frozen is a business-logic rejection, reported through the
            // accepted/error_message smell the ack contract preserves.
            Err(StorageError::Frozen(id)) => Ok(Response::new(UpdateHeuristicConfidenceResponse {
                accepted: true,
                alpha: 0.0,
                beta: 0.0,
                confidence: 0.0,
                error_message: format!("heuristic '{id}' is frozen"),
            })),
            Err(e) => Ok(Response::new(UpdateHeuristicConfidenceResponse {
                accepted: false,
                alpha: 0.0,
                beta: 0.0,
                confidence: 0.0,
                error_message: e.to_string(),
            })),
        }
    }

    async fn delete_heuristic(
        &self,
        request: Request<DeleteHeuristicRequest>,
    ) -> Result<Response<DeleteHeuristicResponse>, Status> {
        let req = request.into_inner();
        let meta = Self::meta_of(req.meta.clone());
        match self.storage.delete_heuristic(&req.heuristic_id).await {
            Ok(existed) => {
                if existed {
                    self.notify_change(
                        &meta,
                        req.heuristic_id.clone(),
                        HeuristicChange::Deleted,
                        None,
                    );
                }
                Ok(Response::new(DeleteHeuristicResponse {
                    accepted: existed,
                    error_message: if existed {
                        String::new()
                    } else {
                        format!("heuristic '{}' not found", req.heuristic_id)
                    },
                }))
            }
            Err(e) => Ok(Response::new(DeleteHeuristicResponse {
                accepted: false,
                error_message: e.to_string(),
            })),
        }
    }

    async fn query_matching_heuristics(
        &self,
        request: Request<QueryMatchingHeuristicsRequest>,
    ) -> Result<Response<QueryMatchingHeuristicsResponse>, Status> {
        let req = request.into_inner();
        let source = if req.source.is_empty() {
            None
        } else {
            Some(req.source.as_str())
        };
        let limit = if req.limit == 0 { 10 } else { req.limit as usize };

        // Storage-only path: the caller had no embedding, so produce one
        // here before matching.
        let embedding = if req.event_embedding.is_empty() && !req.raw_text.is_empty() {
            match self.embed_or_error(&req.raw_text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    return Ok(Response::new(QueryMatchingHeuristicsResponse {
                        matches: Vec::new(),
                        error_message: err,
                    }));
                }
            }
        } else {
            req.event_embedding
        };

        match self
            .storage
            .query_matching_heuristics(
                &embedding,
                source,
                req.min_similarity,
                req.min_confidence,
                limit,
            )
            .await
        {
            Ok(matches) => Ok(Response::new(QueryMatchingHeuristicsResponse {
                matches: matches
                    .into_iter()
                    .map(|(heuristic, similarity)| v1::HeuristicMatch {
                        heuristic: Some(heuristic.into()),
                        similarity,
                    })
                    .collect(),
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(QueryMatchingHeuristicsResponse {
                matches: Vec::new(),
                error_message: e.to_string(),
            })),
        }
    }

    async fn record_heuristic_fire(
        &self,
        request: Request<RecordHeuristicFireRequest>,
    ) -> Result<Response<RecordHeuristicFireResponse>, Status> {
        let req = request.into_inner();
        let episodic_event_id = if req.episodic_event_id.is_empty() {
            None
        } else {
            Some(req.episodic_event_id)
        };
        let fire = gladys_core::fire::HeuristicFire::new(
            &req.heuristic_id,
            &req.event_id,
            episodic_event_id,
        );

        match self.storage.record_fire(fire).await {
            Ok(fire_id) => Ok(Response::new(RecordHeuristicFireResponse {
                accepted: true,
                fire_id,
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(RecordHeuristicFireResponse {
                accepted: false,
                fire_id: String::new(),
                error_message: e.to_string(),
            })),
        }
    }

    async fn resolve_heuristic_fire(
        &self,
        request: Request<ResolveHeuristicFireRequest>,
    ) -> Result<Response<ResolveHeuristicFireResponse>, Status> {
        let req = request.into_inner();
        let outcome = req.outcome().into();
        let feedback_source = feedback_source_from_wire(req.feedback_source());

        match self
            .storage
            .resolve_fire(&req.fire_id, outcome, feedback_source)
            .await
        {
            Ok(()) => Ok(Response::new(ResolveHeuristicFireResponse {
                accepted: true,
                error_message: String::new(),
            })),
            Err(e @ StorageError::AlreadyResolved(_)) => {
                Ok(Response::new(ResolveHeuristicFireResponse {
                    accepted: false,
                    error_message: e.to_string(),
                }))
            }
            Err(e) => Ok(Response::new(ResolveHeuristicFireResponse {
                accepted: false,
                error_message: e.to_string(),
            })),
        }
    }

    async fn record_feedback_event(
        &self,
        request: Request<RecordFeedbackEventRequest>,
    ) -> Result<Response<RecordFeedbackEventResponse>, Status> {
        let req = request.into_inner();
        let Some(wire) = req.feedback else {
            return Ok(Response::new(RecordFeedbackEventResponse {
                accepted: false,
                feedback_id: String::new(),
                error_message: "missing feedback".to_string(),
            }));
        };

        match self.storage.record_feedback(wire.into()).await {
            Ok(id) => Ok(Response::new(RecordFeedbackEventResponse {
                accepted: true,
                feedback_id: id,
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(RecordFeedbackEventResponse {
                accepted: false,
                feedback_id: String::new(),
                error_message: e.to_string(),
            })),
        }
    }

    async fn generate_embedding(
        &self,
        request: Request<GenerateEmbeddingRequest>,
    ) -> Result<Response<GenerateEmbeddingResponse>, Status> {
        let req = request.into_inner();
        match self.embedder.embed(&req.text).await {
            Ok(embedding) => Ok(Response::new(GenerateEmbeddingResponse {
                embedding,
                model_id: self.embedder.model_id().to_string(),
                error_message: String::new(),
            })),
            Err(e) => Ok(Response::new(GenerateEmbeddingResponse {
                embedding: Vec::new(),
                model_id: self.embedder.model_id().to_string(),
                error_message: e.to_string(),
            })),
        }
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let (status, message) = match self.storage.ping().await {
            Ok(()) => (v1::health_response::Status::Serving, "ok".to_string()),
            Err(e) => (v1::health_response::Status::NotServing, e.to_string()),
        };
        Ok(Response::new(HealthResponse {
            status: status as i32,
            message,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use gladys_core::heuristic::{HeuristicAction, HeuristicCondition};
    use gladys_storage::MemoryStorage;
    use gladys_test_utils::StaticEmbedder;
    use std::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<(String, HeuristicChange)>>,
    }

    #[async_trait]
    impl InvalidationSink for RecordingSink {
        async fn notify(
            &self,
            _meta: &RequestMeta,
            heuristic_id: &str,
            change: HeuristicChange,
            _heuristic: Option<Heuristic>,
        ) -> Result<(), gladys_client::ClientError> {
            self.seen
                .lock()
                .unwrap()
                .push((heuristic_id.to_string(), change));
            Ok(())
        }
    }

    fn service_with_sink() -> (MemoryService, Arc<RecordingSink>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let embedder = Arc::new(StaticEmbedder::with_dimension(64));
        let service = MemoryService::new(
            Arc::clone(&storage) as Arc<dyn StorageBackend>,
            embedder,
            Some(Arc::clone(&sink) as Arc<dyn InvalidationSink>),
            MemoryConfig { embedding_dim: 64 },
        );
        (service, sink, storage)
    }

    fn wire_heuristic(text: &str, source: &str) -> v1::Heuristic {
        Heuristic::learned(
            text,
            HeuristicCondition {
                text: text.to_string(),
                source: Some(source.to_string()),
            },
            HeuristicAction {
                message: "act".to_string(),
                extra: None,
            },
        )
        .into()
    }

    #[tokio::test]
    async fn store_heuristic_generates_embedding_and_notifies() {
        let (service, sink, storage) = service_with_sink();
        let response = service
            .store_heuristic(Request::new(StoreHeuristicRequest {
                meta: None,
                heuristic: Some(wire_heuristic("player died in lava", "minecraft")),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.accepted, "{}", response.error_message);
        let stored = storage
            .get_heuristic(&response.heuristic_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.condition_embedding.len(), 64);

        // Let the background notify task run.
        tokio::task::yield_now().await;
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, HeuristicChange::Created);
    }

    #[tokio::test]
    async fn store_episode_is_idempotent_over_the_wire() {
        let (service, _sink, _storage) = service_with_sink();
        let episode = v1::EpisodicEvent {
            event: Some(v1::Event {
                id: "e-1".to_string(),
                source: "minecraft".to_string(),
                raw_text: "skeleton arrow hit".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        for _ in 0..2 {
            let ack = service
                .store_episode(Request::new(StoreEpisodeRequest {
                    meta: None,
                    episode: Some(episode.clone()),
                }))
                .await
                .unwrap()
                .into_inner();
            assert!(ack.accepted);
            assert!(ack.error_message.is_empty());
        }
    }

    #[tokio::test]
    async fn confidence_update_notifies_and_returns_counts() {
        let (service, sink, _storage) = service_with_sink();
        let stored = service
            .store_heuristic(Request::new(StoreHeuristicRequest {
                meta: None,
                heuristic: Some(wire_heuristic("creeper nearby", "minecraft")),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();

        let update = service
            .update_heuristic_confidence(Request::new(UpdateHeuristicConfidenceRequest {
                meta: None,
                heuristic_id: stored.heuristic_id.clone(),
                positive: true,
                feedback_source: v1::FeedbackSource::Explicit as i32,
                weight: 0.0, // lenient default -> 1.0
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(update.accepted);
        assert_eq!(update.alpha, 2.0);
        assert_eq!(update.beta, 1.0);
        assert!((update.confidence - 2.0 / 3.0).abs() < 1e-9);

        tokio::task::yield_now().await;
        let seen = sink.seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|(id, change)| id == &stored.heuristic_id && *change == HeuristicChange::Updated));
    }

    #[tokio::test]
    async fn missing_heuristic_update_is_rejected() {
        let (service, _sink, _storage) = service_with_sink();
        let update = service
            .update_heuristic_confidence(Request::new(UpdateHeuristicConfidenceRequest {
                meta: None,
                heuristic_id: "nope".to_string(),
                positive: false,
                feedback_source: 0,
                weight: 1.0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!update.accepted);
        assert!(update.error_message.contains("not found"));
    }

    #[tokio::test]
    async fn fire_resolution_is_first_wins_over_the_wire() {
        let (service, _sink, _storage) = service_with_sink();
        let stored = service
            .store_heuristic(Request::new(StoreHeuristicRequest {
                meta: None,
                heuristic: Some(wire_heuristic("zombie at door", "minecraft")),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();

        let fire = service
            .record_heuristic_fire(Request::new(RecordHeuristicFireRequest {
                meta: None,
                heuristic_id: stored.heuristic_id,
                event_id: "e-9".to_string(),
                episodic_event_id: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(fire.accepted);

        let first = service
            .resolve_heuristic_fire(Request::new(ResolveHeuristicFireRequest {
                meta: None,
                fire_id: fire.fire_id.clone(),
                outcome: v1::FireOutcome::Success as i32,
                feedback_source: v1::FeedbackSource::Explicit as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(first.accepted);

        let second = service
            .resolve_heuristic_fire(Request::new(ResolveHeuristicFireRequest {
                meta: None,
                fire_id: fire.fire_id,
                outcome: v1::FireOutcome::Fail as i32,
                feedback_source: v1::FeedbackSource::Explicit as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!second.accepted);
        assert!(second.error_message.contains("already resolved"));
    }

    #[tokio::test]
    async fn delete_notifies_even_when_cache_is_stale_later() {
        let (service, sink, _storage) = service_with_sink();
        let stored = service
            .store_heuristic(Request::new(StoreHeuristicRequest {
                meta: None,
                heuristic: Some(wire_heuristic("high score achieved", "gaming")),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();

        let deleted = service
            .delete_heuristic(Request::new(DeleteHeuristicRequest {
                meta: None,
                heuristic_id: stored.heuristic_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(deleted.accepted);

        tokio::task::yield_now().await;
        let seen = sink.seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|(id, change)| id == &stored.heuristic_id && *change == HeuristicChange::Deleted));
    }

    #[tokio::test]
    async fn round_trip_store_then_match() {
        let (service, _sink, _storage) = service_with_sink();
        let stored = service
            .store_heuristic(Request::new(StoreHeuristicRequest {
                meta: None,
                heuristic: Some(wire_heuristic("player died in lava", "minecraft")),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(stored.accepted);

        let embedding = service
            .generate_embedding(Request::new(GenerateEmbeddingRequest {
                meta: None,
                text: "player died in lava".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(embedding.error_message.is_empty());

        let matches = service
            .query_matching_heuristics(Request::new(QueryMatchingHeuristicsRequest {
                meta: None,
                event_embedding: embedding.embedding,
                raw_text: String::new(),
                source: "minecraft".to_string(),
                min_similarity: 0.6,
                min_confidence: 0.4,
                limit: 5,
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(matches.matches.len(), 1);
        let top = &matches.matches[0];
        assert!(top.similarity >= 0.99);
        assert_eq!(top.heuristic.as_ref().unwrap().id, stored.heuristic_id);
    }
}
