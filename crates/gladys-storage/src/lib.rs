//! Persistence layer for the GLADyS core.
//!
//! All persisted rows (episodes, heuristics, heuristic fires, feedback
//! events) live behind the [`StorageBackend`] trait. Two backends ship:
//!
//! - [`MemoryStorage`]: in-process maps with brute-force cosine search,
//!   for tests and ephemeral single-node runs.
//! - [`PostgresStorage`]: `PostgreSQL` with pgvector, an HNSW index over
//!   heuristic condition embeddings, and a trigger-maintained full-text
//!   vector over condition text.
//!
//! The Memory Store service wraps a backend and adds embedding
//! generation and cache-invalidation notifications; nothing in this
//! crate talks gRPC.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StorageError};
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

use async_trait::async_trait;
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::FeedbackEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome, HeuristicFire};
use gladys_core::Heuristic;

/// Whether a write created a row or hit an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// The row already existed; the write was a no-op.
    Duplicate,
}

/// Updated pseudo-counts after a confidence update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceCounts {
    pub alpha: f64,
    pub beta: f64,
    pub confidence: f64,
}

/// Uniform persistence contract for every backend.
///
/// Episodes are append-only and idempotent on the event id. Heuristic
/// confidence updates are atomic; concurrent updates serialize on the
/// row. Fires resolve exactly once.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist an episode. A second call with the same event id is a
    /// no-op reported as [`StoreOutcome::Duplicate`].
    async fn store_episode(&self, episode: EpisodicEvent) -> Result<StoreOutcome>;

    /// Fetch one episode by its event id.
    async fn get_episode(&self, event_id: &str) -> Result<Option<EpisodicEvent>>;

    /// Episodes in a time window, newest first. Zero bounds are open.
    async fn query_episodes_by_time(
        &self,
        start_ms: i64,
        end_ms: i64,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>>;

    /// Episodes ranked by cosine similarity to the query embedding.
    async fn query_episodes_by_similarity(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(EpisodicEvent, f64)>>;

    /// Insert or replace a heuristic. Returns its id.
    async fn store_heuristic(&self, heuristic: Heuristic) -> Result<String>;

    /// Fetch one heuristic.
    async fn get_heuristic(&self, id: &str) -> Result<Option<Heuristic>>;

    /// Apply one weighted Beta-Binomial observation atomically.
    ///
    /// Frozen heuristics are rejected. Historically inconsistent rows
    /// (non-positive pseudo-counts) are floored at the prior before the
    /// increment.
    async fn update_heuristic_confidence(
        &self,
        id: &str,
        positive: bool,
        weight: f64,
    ) -> Result<ConfidenceCounts>;

    /// Remove a heuristic. Returns whether it existed.
    async fn delete_heuristic(&self, id: &str) -> Result<bool>;

    /// Cosine search over heuristic condition embeddings.
    ///
    /// Keeps candidates whose similarity clears both the global floor and
    /// the heuristic's own threshold, whose confidence clears
    /// `min_confidence`, and, when `source` is given, whose source
    /// matches exactly (heuristics with no source are excluded).
    async fn query_matching_heuristics(
        &self,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<(Heuristic, f64)>>;

    /// Append a fire audit row and bump the heuristic's fire counter.
    async fn record_fire(&self, fire: HeuristicFire) -> Result<String>;

    /// Fetch one fire.
    async fn get_fire(&self, fire_id: &str) -> Result<Option<HeuristicFire>>;

    /// Resolve a fire to its terminal outcome. The first resolution wins;
    /// repeats fail with [`StorageError::AlreadyResolved`]. A success
    /// outcome bumps the heuristic's success counter.
    async fn resolve_fire(
        &self,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<()>;

    /// Append a normalized feedback event. Returns its id.
    async fn record_feedback(&self, feedback: FeedbackEvent) -> Result<String>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<()>;
}
