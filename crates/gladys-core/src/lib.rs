//! Domain types and shared runtime primitives for the GLADyS core.
//!
//! GLADyS routes sensor events through a learned-salience fast path and an
//! LLM-backed slow path, feeding outcomes back into heuristic confidence.
//! This crate holds the vocabulary every service shares: events, salience
//! vectors, heuristics and their Bayesian counts, fire/feedback records,
//! component registry entries, the embedder seam, and small runtime
//! helpers (retry, env config, logged task spawning).
//!
//! Wire types live in `gladys-proto`; this crate deliberately has no
//! gRPC dependency so storage and cache logic stay testable in isolation.

pub mod component;
pub mod embedding;
pub mod env;
pub mod error;
pub mod event;
pub mod feedback;
pub mod fire;
pub mod heuristic;
pub mod retry;
pub mod salience;
pub mod similarity;
pub mod task;

pub use embedding::{EmbedError, Embedder, DEFAULT_EMBEDDING_DIM};
pub use error::CoreError;
pub use event::{Event, RequestMeta};
pub use heuristic::{Heuristic, HeuristicAction, HeuristicCondition, HeuristicOrigin};
pub use salience::SalienceVector;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
