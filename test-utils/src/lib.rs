//! Shared test doubles for the GLADyS core.
//!
//! - [`StaticEmbedder`]: deterministic embeddings with controllable
//!   pairwise similarity, so semantic-match tests need no model.
//! - [`ScriptedChat`]: a [`ChatModel`] that replays canned replies.
//! - [`InProcessMemoryAccess`] / [`InProcessHeuristicSource`]: adapters
//!   that satisfy the executive's and gateway's storage seams directly
//!   over a [`MemoryStorage`], no gRPC involved.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use gladys_client::memory::ConfidenceUpdate;
use gladys_client::ClientError;
use gladys_core::embedding::{EmbedError, Embedder};
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::FeedbackEvent;
use gladys_core::fire::FeedbackSource;
use gladys_core::{Heuristic, RequestMeta};
use gladys_executive::llm::{ChatMessage, ChatModel, LlmError};
use gladys_executive::MemoryAccess;
use gladys_salience::HeuristicSource;
use gladys_storage::{MemoryStorage, StorageBackend};

/// Buckets set per embedded text; distinct texts share few buckets, so
/// their cosine stays well under matching thresholds.
const BUCKETS_PER_TEXT: usize = 4;

fn seeded_hash(text: &str, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Deterministic embedder for tests.
///
/// Each text maps to a fixed unit vector; the same text always embeds
/// identically, different texts are nearly orthogonal. Use [`Self::alias`]
/// to place one text at a chosen cosine similarity to another, which is
/// how paraphrase-match scenarios are staged.
pub struct StaticEmbedder {
    dimension: usize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
}

impl StaticEmbedder {
    /// Embedder producing vectors of the given dimension (64 is plenty
    /// to keep unrelated texts dissimilar).
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(BUCKETS_PER_TEXT),
            overrides: Mutex::new(HashMap::new()),
        }
    }

    fn base_vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for seed in 0..BUCKETS_PER_TEXT as u64 {
            let bucket = (seeded_hash(text, seed) as usize) % self.dimension;
            v[bucket] += 1.0;
        }
        normalize(v)
    }

    /// Synchronous embedding, for seeding fixtures outside async code.
    #[must_use]
    pub fn embed_blocking(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.overrides.lock().unwrap().get(text) {
            return v.clone();
        }
        self.base_vector(text)
    }

    /// Pin `text` at (approximately) `similarity` cosine to `base`.
    pub fn alias(&self, text: &str, base: &str, similarity: f64) {
        let base_vec = self.embed_blocking(base);
        let raw = self.base_vector(&format!("{text}#ortho"));

        // Gram-Schmidt: an orthonormal direction to the base vector.
        let dot: f32 = base_vec.iter().zip(&raw).map(|(a, b)| a * b).sum();
        let mut ortho: Vec<f32> = raw
            .iter()
            .zip(&base_vec)
            .map(|(r, b)| r - dot * b)
            .collect();
        if ortho.iter().all(|x| x.abs() < 1e-6) {
            // Degenerate: pick any axis not aligned with the base.
            ortho = vec![0.0; self.dimension];
            ortho[0] = 1.0;
        }
        let ortho = normalize(ortho);

        let s = similarity.clamp(-1.0, 1.0) as f32;
        let o = (1.0 - s * s).sqrt();
        let aliased: Vec<f32> = base_vec
            .iter()
            .zip(&ortho)
            .map(|(b, u)| s * b + o * u)
            .collect();
        self.overrides
            .lock()
            .unwrap()
            .insert(text.to_string(), normalize(aliased));
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_blocking(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "static-test-embedder"
    }
}

/// A chat model replaying scripted replies in order.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    unavailable: bool,
}

impl ScriptedChat {
    #[must_use]
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            unavailable: false,
        }
    }

    /// A backend that always fails as unreachable.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            unavailable: true,
        }
    }

    /// Replies not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        if self.unavailable {
            return Err(LlmError::Unavailable("scripted outage".to_string()));
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string()))
    }

    fn model_id(&self) -> &str {
        "scripted-test-chat"
    }
}

fn storage_err(e: gladys_storage::StorageError) -> ClientError {
    ClientError::Rejected(e.to_string())
}

/// Implements the executive's memory seam directly over a
/// [`MemoryStorage`], mirroring the Memory Store service's behavior
/// (embedding generation on store, counts on update).
pub struct InProcessMemoryAccess {
    storage: Arc<MemoryStorage>,
    embedder: Arc<StaticEmbedder>,
}

impl InProcessMemoryAccess {
    #[must_use]
    pub fn new(storage: Arc<MemoryStorage>, embedder: Arc<StaticEmbedder>) -> Self {
        Self { storage, embedder }
    }
}

#[async_trait]
impl MemoryAccess for InProcessMemoryAccess {
    async fn get_episode(
        &self,
        _meta: &RequestMeta,
        event_id: &str,
    ) -> Result<Option<EpisodicEvent>, ClientError> {
        self.storage.get_episode(event_id).await.map_err(storage_err)
    }

    async fn generate_embedding(
        &self,
        _meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, ClientError> {
        Ok(self.embedder.embed_blocking(text))
    }

    async fn query_matching_heuristics(
        &self,
        _meta: &RequestMeta,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, ClientError> {
        self.storage
            .query_matching_heuristics(embedding, source, min_similarity, min_confidence, limit as usize)
            .await
            .map_err(storage_err)
    }

    async fn store_heuristic(
        &self,
        _meta: &RequestMeta,
        mut heuristic: Heuristic,
        generate_embedding: bool,
    ) -> Result<String, ClientError> {
        if generate_embedding && heuristic.condition_embedding.is_empty() {
            heuristic.condition_embedding = self.embedder.embed_blocking(&heuristic.condition.text);
        }
        self.storage
            .store_heuristic(heuristic)
            .await
            .map_err(storage_err)
    }

    async fn update_heuristic_confidence(
        &self,
        _meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        _feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<ConfidenceUpdate, ClientError> {
        let counts = self
            .storage
            .update_heuristic_confidence(heuristic_id, positive, weight)
            .await
            .map_err(storage_err)?;
        Ok(ConfidenceUpdate {
            alpha: counts.alpha,
            beta: counts.beta,
            confidence: counts.confidence,
        })
    }

    async fn record_feedback(
        &self,
        _meta: &RequestMeta,
        feedback: FeedbackEvent,
    ) -> Result<String, ClientError> {
        self.storage.record_feedback(feedback).await.map_err(storage_err)
    }
}

/// Implements the gateway's storage seam directly over a
/// [`MemoryStorage`].
pub struct InProcessHeuristicSource {
    storage: Arc<MemoryStorage>,
    embedder: Arc<StaticEmbedder>,
}

impl InProcessHeuristicSource {
    #[must_use]
    pub fn new(storage: Arc<MemoryStorage>, embedder: Arc<StaticEmbedder>) -> Self {
        Self { storage, embedder }
    }
}

#[async_trait]
impl HeuristicSource for InProcessHeuristicSource {
    async fn embed(&self, _meta: &RequestMeta, text: &str) -> Result<Vec<f32>, ClientError> {
        Ok(self.embedder.embed_blocking(text))
    }

    async fn matching_heuristics(
        &self,
        _meta: &RequestMeta,
        embedding: &[f32],
        raw_text: Option<&str>,
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, ClientError> {
        let owned;
        let embedding = if embedding.is_empty() {
            match raw_text {
                Some(text) => {
                    owned = self.embedder.embed_blocking(text);
                    owned.as_slice()
                }
                None => embedding,
            }
        } else {
            embedding
        };
        self.storage
            .query_matching_heuristics(embedding, source, min_similarity, min_confidence, limit as usize)
            .await
            .map_err(storage_err)
    }
}
