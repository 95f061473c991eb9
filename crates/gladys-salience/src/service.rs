//! gRPC service implementation for the Salience Gateway.

use std::sync::Arc;

use async_trait::async_trait;
use gladys_core::{Heuristic, RequestMeta, SalienceVector};
use gladys_proto::v1::{
    self, salience_gateway_server::SalienceGateway, EvaluateSalienceRequest,
    EvaluateSalienceResponse, EvictFromCacheRequest, EvictFromCacheResponse, FlushCacheRequest,
    FlushCacheResponse, GetCacheStatsRequest, GetCacheStatsResponse, HealthRequest,
    HealthResponse, ListCachedHeuristicsRequest, ListCachedHeuristicsResponse,
    NotifyHeuristicChangeRequest, NotifyHeuristicChangeResponse,
};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::cache::{CacheMatch, HeuristicCache};
use crate::novelty::EventMemory;
use crate::{SalienceConfig, GATEWAY_MODEL_ID};

/// The gateway's window into the Memory Store. Backed by
/// [`gladys_client::MemoryClient`] in production; tests substitute an
/// in-process adapter.
#[async_trait]
pub trait HeuristicSource: Send + Sync {
    /// Embed text (served by the Memory Store's embedder).
    async fn embed(
        &self,
        meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, gladys_client::ClientError>;

    /// Vector search over stored heuristics. When `embedding` is empty
    /// the store embeds `raw_text` itself (storage-only path).
    async fn matching_heuristics(
        &self,
        meta: &RequestMeta,
        embedding: &[f32],
        raw_text: Option<&str>,
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, gladys_client::ClientError>;
}

#[async_trait]
impl HeuristicSource for gladys_client::MemoryClient {
    async fn embed(
        &self,
        meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, gladys_client::ClientError> {
        self.generate_embedding(meta, text).await
    }

    async fn matching_heuristics(
        &self,
        meta: &RequestMeta,
        embedding: &[f32],
        raw_text: Option<&str>,
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, gladys_client::ClientError> {
        self.query_matching_heuristics(
            meta,
            embedding,
            raw_text,
            source,
            min_similarity,
            min_confidence,
            limit,
        )
        .await
    }
}

/// Outcome of one evaluation, before wire conversion.
struct Evaluation {
    salience: SalienceVector,
    from_cache: bool,
    matched_heuristic_id: Option<String>,
    matched_action: Option<String>,
    match_similarity: f64,
    error_message: Option<String>,
}

/// The Salience Gateway service.
pub struct SalienceService {
    source: Arc<dyn HeuristicSource>,
    cache: Mutex<HeuristicCache>,
    event_memory: Mutex<EventMemory>,
    config: SalienceConfig,
}

impl SalienceService {
    #[must_use]
    pub fn new(source: Arc<dyn HeuristicSource>, config: SalienceConfig) -> Self {
        Self {
            source,
            cache: Mutex::new(HeuristicCache::new(config.cache_capacity, config.cache_ttl)),
            event_memory: Mutex::new(EventMemory::new(config.event_memory_size)),
            config,
        }
    }

    /// Pick the strongest candidate: similarity weighted by confidence.
    fn select_top(candidates: Vec<CacheMatch>) -> Option<CacheMatch> {
        candidates.into_iter().max_by(|a, b| {
            let score_a = a.similarity * a.heuristic.confidence;
            let score_b = b.similarity * b.heuristic.confidence;
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// The matching algorithm: embed, scan the cache, fall back to
    /// storage (warming the cache), then score.
    async fn evaluate(&self, meta: &RequestMeta, req: &EvaluateSalienceRequest) -> Evaluation {
        let source_filter = if req.source.is_empty() {
            None
        } else {
            Some(req.source.as_str())
        };

        // Embedding failure falls back to the storage-only path; it is
        // not an error.
        let embedding = if req.raw_text.is_empty() {
            Vec::new()
        } else {
            match self.source.embed(meta, &req.raw_text).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    debug!(event_id = %req.event_id, error = %e, "embedding failed; storage-only matching");
                    Vec::new()
                }
            }
        };

        // Habituation against recent events; the event joins the memory
        // afterwards so it cannot damp itself.
        let habituation = if embedding.is_empty() {
            0.0
        } else {
            let memory = self.event_memory.lock().await;
            memory.habituation(&embedding, self.config.novelty_threshold)
        };

        let mut error_message = None;
        let mut from_cache = true;
        let mut candidates = if embedding.is_empty() {
            Vec::new()
        } else {
            let mut cache = self.cache.lock().await;
            cache.match_event(
                &embedding,
                source_filter,
                self.config.min_similarity,
                self.config.min_confidence,
            )
        };

        if candidates.is_empty() && !req.raw_text.is_empty() {
            from_cache = false;
            let raw_text = embedding.is_empty().then_some(req.raw_text.as_str());
            match self
                .source
                .matching_heuristics(
                    meta,
                    &embedding,
                    raw_text,
                    source_filter,
                    self.config.min_similarity,
                    self.config.min_confidence,
                    self.config.storage_fetch_limit,
                )
                .await
            {
                Ok(matches) => {
                    // Storage matches warm the cache.
                    let mut cache = self.cache.lock().await;
                    for (heuristic, similarity) in matches {
                        cache.insert(heuristic.clone());
                        candidates.push(CacheMatch {
                            heuristic,
                            similarity,
                        });
                    }
                }
                Err(e) => {
                    // A miss plus no storage result is a legitimate "no
                    // match"; a storage failure is surfaced alongside the
                    // default vector.
                    warn!(event_id = %req.event_id, error = %e, "storage heuristic query failed");
                    error_message = Some(e.to_string());
                }
            }
        }

        if !embedding.is_empty() {
            self.event_memory.lock().await.remember(embedding);
        }

        let top = Self::select_top(candidates);

        // Novelty starts from the configured fallback and decays with
        // habituation; a fresh event scores the fallback, the tenth
        // lookalike approaches zero.
        let mut salience = SalienceVector::zero(GATEWAY_MODEL_ID);
        salience.habituation = habituation.clamp(0.0, 1.0);
        salience.set_dimension(
            "novelty",
            self.config.fallback_novelty * (1.0 - salience.habituation),
        );
        salience.recompute_aggregate();

        match top {
            Some(matched) => {
                if let Some(boost) = matched.heuristic.action.salience_boost() {
                    salience.apply_boost(boost);
                }
                self.cache.lock().await.touch(&matched.heuristic.id);
                debug!(
                    event_id = %req.event_id,
                    heuristic_id = %matched.heuristic.id,
                    similarity = matched.similarity,
                    from_cache,
                    "heuristic matched"
                );
                Evaluation {
                    salience,
                    from_cache,
                    matched_action: Some(matched.heuristic.action.message.clone()),
                    matched_heuristic_id: Some(matched.heuristic.id),
                    match_similarity: matched.similarity,
                    error_message,
                }
            }
            None => Evaluation {
                salience,
                from_cache: false,
                matched_heuristic_id: None,
                matched_action: None,
                match_similarity: 0.0,
                error_message,
            },
        }
    }
}

#[tonic::async_trait]
impl SalienceGateway for SalienceService {
    async fn evaluate_salience(
        &self,
        request: Request<EvaluateSalienceRequest>,
    ) -> Result<Response<EvaluateSalienceResponse>, Status> {
        let req = request.into_inner();
        let meta: RequestMeta = req.meta.clone().map(Into::into).unwrap_or_default();
        let evaluation = self.evaluate(&meta, &req).await;

        Ok(Response::new(EvaluateSalienceResponse {
            salience: Some(evaluation.salience.into()),
            from_cache: evaluation.from_cache,
            matched_heuristic_id: evaluation.matched_heuristic_id.unwrap_or_default(),
            match_similarity: evaluation.match_similarity,
            error_message: evaluation.error_message.unwrap_or_default(),
            matched_action: evaluation.matched_action.unwrap_or_default(),
        }))
    }

    async fn flush_cache(
        &self,
        _request: Request<FlushCacheRequest>,
    ) -> Result<Response<FlushCacheResponse>, Status> {
        let evicted = self.cache.lock().await.flush();
        info!(evicted, "cache flushed");
        Ok(Response::new(FlushCacheResponse { evicted }))
    }

    async fn evict_from_cache(
        &self,
        request: Request<EvictFromCacheRequest>,
    ) -> Result<Response<EvictFromCacheResponse>, Status> {
        let req = request.into_inner();
        let evicted = self.cache.lock().await.evict(&req.heuristic_id);
        Ok(Response::new(EvictFromCacheResponse { evicted }))
    }

    async fn list_cached_heuristics(
        &self,
        request: Request<ListCachedHeuristicsRequest>,
    ) -> Result<Response<ListCachedHeuristicsResponse>, Status> {
        let req = request.into_inner();
        let limit = if req.limit == 0 { 50 } else { req.limit as usize };
        let entries = self.cache.lock().await.list(limit);
        Ok(Response::new(ListCachedHeuristicsResponse {
            heuristics: entries
                .into_iter()
                .map(|entry| v1::CachedHeuristic {
                    heuristic_id: entry.heuristic.id.clone(),
                    name: entry.heuristic.name.clone(),
                    source: entry.heuristic.source.clone().unwrap_or_default(),
                    confidence: entry.heuristic.confidence,
                    hit_count: entry.hit_count,
                    last_hit_ms: entry.last_hit_ms.unwrap_or(0),
                    cached_at_ms: entry.cached_at_ms,
                })
                .collect(),
        }))
    }

    async fn get_cache_stats(
        &self,
        _request: Request<GetCacheStatsRequest>,
    ) -> Result<Response<GetCacheStatsResponse>, Status> {
        let stats = self.cache.lock().await.stats();
        Ok(Response::new(GetCacheStatsResponse {
            hits: stats.hits,
            misses: stats.misses,
            entries: stats.entries,
            capacity: stats.capacity,
            evictions: stats.evictions,
            invalidations: stats.invalidations,
        }))
    }

    async fn notify_heuristic_change(
        &self,
        request: Request<NotifyHeuristicChangeRequest>,
    ) -> Result<Response<NotifyHeuristicChangeResponse>, Status> {
        let req = request.into_inner();
        let change = req.change_type();
        let mut cache = self.cache.lock().await;
        match change {
            v1::HeuristicChangeType::Deleted => {
                cache.evict(&req.heuristic_id);
                debug!(heuristic_id = %req.heuristic_id, "evicted on delete notification");
            }
            v1::HeuristicChangeType::Created | v1::HeuristicChangeType::Updated => {
                match req.heuristic {
                    // A fresh body refreshes the entry in place.
                    Some(wire) if !wire.id.is_empty() => {
                        cache.insert(Heuristic::from(wire));
                    }
                    // No body: drop the stale entry and let the next
                    // lookup re-warm from storage.
                    _ => {
                        cache.evict(&req.heuristic_id);
                    }
                }
            }
            v1::HeuristicChangeType::Unspecified => {
                warn!(heuristic_id = %req.heuristic_id, "ignoring unspecified change notification");
            }
        }
        Ok(Response::new(NotifyHeuristicChangeResponse {
            acknowledged: true,
        }))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(HealthResponse {
            status: v1::health_response::Status::Serving as i32,
            message: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use gladys_core::heuristic::{HeuristicAction, HeuristicCondition};
    use gladys_storage::{MemoryStorage, StorageBackend};
    use gladys_test_utils::{InProcessHeuristicSource, StaticEmbedder};

    fn request(event_id: &str, source: &str, text: &str) -> EvaluateSalienceRequest {
        EvaluateSalienceRequest {
            meta: None,
            event_id: event_id.to_string(),
            source: source.to_string(),
            raw_text: text.to_string(),
            structured_json: String::new(),
            entity_ids: Vec::new(),
        }
    }

    async fn seed_heuristic(
        storage: &MemoryStorage,
        embedder: &StaticEmbedder,
        text: &str,
        source: &str,
        boost: Option<serde_json::Value>,
    ) -> String {
        let mut h = Heuristic::learned(
            text,
            HeuristicCondition {
                text: text.to_string(),
                source: Some(source.to_string()),
            },
            HeuristicAction {
                message: format!("respond to {text}"),
                extra: boost.map(|b| serde_json::json!({ "salience_boost": b })),
            },
        );
        h.condition_embedding = embedder.embed_blocking(text);
        storage.store_heuristic(h).await.unwrap()
    }

    fn gateway() -> (SalienceService, Arc<MemoryStorage>, Arc<StaticEmbedder>) {
        let storage = Arc::new(MemoryStorage::new());
        let embedder = Arc::new(StaticEmbedder::with_dimension(64));
        let source = Arc::new(InProcessHeuristicSource::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
        ));
        let service = SalienceService::new(source, SalienceConfig::default());
        (service, storage, embedder)
    }

    #[tokio::test]
    async fn no_heuristics_returns_default_salience_not_an_error() {
        let (service, _storage, _embedder) = gateway();
        let response = service
            .evaluate_salience(Request::new(request("e-1", "minecraft", "a novel thing")))
            .await
            .unwrap()
            .into_inner();

        assert!(response.error_message.is_empty());
        assert!(response.matched_heuristic_id.is_empty());
        assert!(!response.from_cache);
        let salience = response.salience.unwrap();
        assert!(salience.salience > 0.0); // fallback novelty floor
    }

    #[tokio::test]
    async fn storage_match_warms_the_cache() {
        let (service, storage, embedder) = gateway();
        let hid = seed_heuristic(
            &storage,
            &embedder,
            "player died in lava",
            "minecraft",
            Some(serde_json::json!({"threat": 0.9, "goal_relevance": 0.8})),
        )
        .await;

        // First evaluation: storage path.
        let first = service
            .evaluate_salience(Request::new(request("e-1", "minecraft", "player died in lava")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(first.matched_heuristic_id, hid);
        assert!(!first.from_cache);
        assert!(first.match_similarity > 0.99);
        let salience = first.salience.unwrap();
        assert_eq!(salience.threat, 0.9);
        assert!(salience.salience >= 0.8);

        // Second evaluation: served from cache.
        let second = service
            .evaluate_salience(Request::new(request("e-2", "minecraft", "player died in lava")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(second.matched_heuristic_id, hid);
        assert!(second.from_cache);

        let stats = service
            .get_cache_stats(Request::new(GetCacheStatsRequest { meta: None }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn fuzzy_match_crosses_paraphrase() {
        let (service, storage, embedder) = gateway();
        embedder.alias("character fell into magma pool and perished", "player died in lava", 0.85);
        let hid = seed_heuristic(&storage, &embedder, "player died in lava", "minecraft", None).await;

        let response = service
            .evaluate_salience(Request::new(request(
                "e-1",
                "minecraft",
                "character fell into magma pool and perished",
            )))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.matched_heuristic_id, hid);
        assert!(response.match_similarity >= 0.7);
    }

    #[tokio::test]
    async fn domain_isolation_blocks_cross_source_matches() {
        let (service, storage, embedder) = gateway();
        embedder.alias("credit score report 800", "high score achieved", 0.9);
        seed_heuristic(&storage, &embedder, "high score achieved", "gaming", None).await;

        let response = service
            .evaluate_salience(Request::new(request("e-1", "finance", "credit score report 800")))
            .await
            .unwrap()
            .into_inner();

        assert!(response.matched_heuristic_id.is_empty());
    }

    #[tokio::test]
    async fn delete_notification_invalidates_within_one_round_trip() {
        let (service, storage, embedder) = gateway();
        let hid = seed_heuristic(&storage, &embedder, "creeper hissing nearby", "minecraft", None).await;

        let first = service
            .evaluate_salience(Request::new(request("e-1", "minecraft", "creeper hissing nearby")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(first.matched_heuristic_id, hid);

        // The store deletes the heuristic and notifies.
        storage.delete_heuristic(&hid).await.unwrap();
        service
            .notify_heuristic_change(Request::new(NotifyHeuristicChangeRequest {
                meta: None,
                heuristic_id: hid.clone(),
                change_type: v1::HeuristicChangeType::Deleted as i32,
                heuristic: None,
            }))
            .await
            .unwrap();

        let second = service
            .evaluate_salience(Request::new(request("e-2", "minecraft", "creeper hissing nearby")))
            .await
            .unwrap()
            .into_inner();
        assert_ne!(second.matched_heuristic_id, hid);
        assert!(second.matched_heuristic_id.is_empty());
    }

    #[tokio::test]
    async fn update_notification_refreshes_cached_confidence() {
        let (service, storage, embedder) = gateway();
        let hid = seed_heuristic(&storage, &embedder, "zombie at the door", "minecraft", None).await;

        // Warm the cache.
        let _ = service
            .evaluate_salience(Request::new(request("e-1", "minecraft", "zombie at the door")))
            .await
            .unwrap();

        // Confidence collapses below the matching floor; the store pushes
        // the fresh body with the notification.
        let mut updated = storage.get_heuristic(&hid).await.unwrap().unwrap();
        updated.alpha = 1.0;
        updated.beta = 5.0;
        updated.confidence = 1.0 / 6.0;
        storage.store_heuristic(updated.clone()).await.unwrap();
        service
            .notify_heuristic_change(Request::new(NotifyHeuristicChangeRequest {
                meta: None,
                heuristic_id: hid.clone(),
                change_type: v1::HeuristicChangeType::Updated as i32,
                heuristic: Some(updated.into()),
            }))
            .await
            .unwrap();

        let response = service
            .evaluate_salience(Request::new(request("e-2", "minecraft", "zombie at the door")))
            .await
            .unwrap()
            .into_inner();
        assert!(response.matched_heuristic_id.is_empty());
    }

    #[tokio::test]
    async fn repeats_habituate_and_lose_novelty() {
        let (service, _storage, _embedder) = gateway();
        let first = service
            .evaluate_salience(Request::new(request("e-1", "lab", "sensor reading nominal")))
            .await
            .unwrap()
            .into_inner();
        let second = service
            .evaluate_salience(Request::new(request("e-2", "lab", "sensor reading nominal")))
            .await
            .unwrap()
            .into_inner();

        let first_salience = first.salience.unwrap();
        let second_salience = second.salience.unwrap();
        assert_eq!(first_salience.habituation, 0.0);
        assert!(second_salience.habituation > 0.9);
        assert!(
            second_salience.dimensions["novelty"] < first_salience.dimensions["novelty"]
        );
    }

    #[tokio::test]
    async fn eviction_and_flush_are_observable() {
        let (service, storage, embedder) = gateway();
        let hid = seed_heuristic(&storage, &embedder, "skeleton shooting", "minecraft", None).await;
        let _ = service
            .evaluate_salience(Request::new(request("e-1", "minecraft", "skeleton shooting")))
            .await
            .unwrap();

        let evicted = service
            .evict_from_cache(Request::new(EvictFromCacheRequest {
                meta: None,
                heuristic_id: hid,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(evicted.evicted);

        let flushed = service
            .flush_cache(Request::new(FlushCacheRequest { meta: None }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(flushed.evicted, 0);
    }

    #[tokio::test]
    async fn listed_entries_carry_hit_bookkeeping() {
        let (service, storage, embedder) = gateway();
        seed_heuristic(&storage, &embedder, "player low on hearts", "minecraft", None).await;
        for i in 0..3 {
            let _ = service
                .evaluate_salience(Request::new(request(
                    &format!("e-{i}"),
                    "minecraft",
                    "player low on hearts",
                )))
                .await
                .unwrap();
        }

        let listed = service
            .list_cached_heuristics(Request::new(ListCachedHeuristicsRequest {
                meta: None,
                limit: 10,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.heuristics.len(), 1);
        assert_eq!(listed.heuristics[0].hit_count, 3);
        assert!(listed.heuristics[0].last_hit_ms > 0);
    }
}
