//! In-memory storage backend.
//!
//! Brute-force cosine search over process-local maps. Used by tests and
//! by ephemeral single-node runs where durability is not required; the
//! semantics match [`PostgresStorage`](crate::PostgresStorage) exactly.

use std::collections::HashMap;

use async_trait::async_trait;
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::FeedbackEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome, HeuristicFire};
use gladys_core::heuristic::{PRIOR_ALPHA, PRIOR_BETA};
use gladys_core::similarity::cosine_similarity;
use gladys_core::Heuristic;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{ConfidenceCounts, Result, StorageBackend, StorageError, StoreOutcome};

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    episodes: RwLock<HashMap<String, EpisodicEvent>>,
    heuristics: RwLock<HashMap<String, Heuristic>>,
    fires: RwLock<HashMap<String, HeuristicFire>>,
    feedback: RwLock<Vec<FeedbackEvent>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored heuristics. Test helper.
    pub async fn heuristic_count(&self) -> usize {
        self.heuristics.read().await.len()
    }

    /// Ids of recorded fires. Test helper.
    pub async fn fire_ids(&self) -> Vec<String> {
        self.fires.read().await.keys().cloned().collect()
    }
}

fn source_matches(heuristic_source: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        // No filter admits every scope.
        None => true,
        // A filter requires an exact match; unscoped heuristics are out.
        Some(wanted) => heuristic_source == Some(wanted),
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn store_episode(&self, episode: EpisodicEvent) -> Result<StoreOutcome> {
        let id = episode.event.id.clone();
        if id.is_empty() {
            return Err(StorageError::Validation(gladys_core::CoreError::invalid(
                "event_id",
                "must not be empty",
            )));
        }
        let mut episodes = self.episodes.write().await;
        if episodes.contains_key(&id) {
            debug!(event_id = %id, "episode already stored; idempotent no-op");
            return Ok(StoreOutcome::Duplicate);
        }
        episodes.insert(id, episode);
        Ok(StoreOutcome::Inserted)
    }

    async fn get_episode(&self, event_id: &str) -> Result<Option<EpisodicEvent>> {
        Ok(self.episodes.read().await.get(event_id).cloned())
    }

    async fn query_episodes_by_time(
        &self,
        start_ms: i64,
        end_ms: i64,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let episodes = self.episodes.read().await;
        let mut hits: Vec<EpisodicEvent> = episodes
            .values()
            .filter(|e| start_ms == 0 || e.event.timestamp_ms >= start_ms)
            .filter(|e| end_ms == 0 || e.event.timestamp_ms <= end_ms)
            .filter(|e| source.map_or(true, |s| e.event.source == s))
            .cloned()
            .collect();
        hits.sort_by_key(|e| std::cmp::Reverse(e.event.timestamp_ms));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn query_episodes_by_similarity(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(EpisodicEvent, f64)>> {
        let episodes = self.episodes.read().await;
        let mut scored: Vec<(EpisodicEvent, f64)> = episodes
            .values()
            .filter(|e| !e.embedding.is_empty())
            .filter(|e| source.map_or(true, |s| e.event.source == s))
            .map(|e| (e.clone(), cosine_similarity(&e.embedding, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn store_heuristic(&self, heuristic: Heuristic) -> Result<String> {
        heuristic.validate()?;
        let id = heuristic.id.clone();
        self.heuristics.write().await.insert(id.clone(), heuristic);
        Ok(id)
    }

    async fn get_heuristic(&self, id: &str) -> Result<Option<Heuristic>> {
        Ok(self.heuristics.read().await.get(id).cloned())
    }

    async fn update_heuristic_confidence(
        &self,
        id: &str,
        positive: bool,
        weight: f64,
    ) -> Result<ConfidenceCounts> {
        let mut heuristics = self.heuristics.write().await;
        let heuristic = heuristics.get_mut(id).ok_or_else(|| StorageError::NotFound {
            kind: "heuristic",
            id: id.to_string(),
        })?;
        if heuristic.frozen {
            return Err(StorageError::Frozen(id.to_string()));
        }
        // Inconsistent historical rows are floored at the prior.
        if heuristic.alpha <= 0.0 {
            heuristic.alpha = PRIOR_ALPHA;
        }
        if heuristic.beta <= 0.0 {
            heuristic.beta = PRIOR_BETA;
        }
        heuristic.apply_feedback(positive, weight)?;
        Ok(ConfidenceCounts {
            alpha: heuristic.alpha,
            beta: heuristic.beta,
            confidence: heuristic.confidence,
        })
    }

    async fn delete_heuristic(&self, id: &str) -> Result<bool> {
        Ok(self.heuristics.write().await.remove(id).is_some())
    }

    async fn query_matching_heuristics(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<(Heuristic, f64)>> {
        let heuristics = self.heuristics.read().await;
        let mut scored: Vec<(Heuristic, f64)> = heuristics
            .values()
            .filter(|h| !h.condition_embedding.is_empty())
            .filter(|h| h.confidence >= min_confidence)
            .filter(|h| source_matches(h.source.as_deref(), source))
            .filter_map(|h| {
                let sim = cosine_similarity(&h.condition_embedding, embedding);
                (sim >= min_similarity.max(h.similarity_threshold)).then(|| (h.clone(), sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn record_fire(&self, fire: HeuristicFire) -> Result<String> {
        let fire_id = fire.id.clone();
        {
            let mut heuristics = self.heuristics.write().await;
            if let Some(h) = heuristics.get_mut(&fire.heuristic_id) {
                h.fire_count += 1;
                h.last_fired_ms = Some(fire.fired_at_ms);
            }
        }
        self.fires.write().await.insert(fire_id.clone(), fire);
        Ok(fire_id)
    }

    async fn get_fire(&self, fire_id: &str) -> Result<Option<HeuristicFire>> {
        Ok(self.fires.read().await.get(fire_id).cloned())
    }

    async fn resolve_fire(
        &self,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<()> {
        let heuristic_id = {
            let mut fires = self.fires.write().await;
            let fire = fires.get_mut(fire_id).ok_or_else(|| StorageError::NotFound {
                kind: "fire",
                id: fire_id.to_string(),
            })?;
            if fire.is_resolved() {
                return Err(StorageError::AlreadyResolved(fire_id.to_string()));
            }
            fire.resolve(outcome, feedback_source)
                .map_err(StorageError::Validation)?;
            fire.heuristic_id.clone()
        };
        if outcome == FireOutcome::Success {
            let mut heuristics = self.heuristics.write().await;
            if let Some(h) = heuristics.get_mut(&heuristic_id) {
                // success_count <= fire_count by construction.
                h.success_count = (h.success_count + 1).min(h.fire_count);
            }
        }
        Ok(())
    }

    async fn record_feedback(&self, feedback: FeedbackEvent) -> Result<String> {
        let id = feedback.id.clone();
        self.feedback.write().await.push(feedback);
        Ok(id)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
