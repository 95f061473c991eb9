//! GLADyS event orchestrator.
//!
//! Single ingress for sensor events: publishes are acked at queue
//! admission, a background worker routes by salience (fast path on a
//! heuristic match, slow path to the executive on threat or high
//! salience, batch drains otherwise), episodes are persisted, fires are
//! audited and watched for outcomes, and accepted events fan out to
//! subscribers. The orchestrator also owns the component registry and
//! the heartbeat/command channel.

pub mod clients;
pub mod queue;
pub mod registry;
pub mod router;
pub mod service;
pub mod subscribers;
pub mod watcher;

pub use clients::{ExecutiveHandle, GatewayHandle, MemoryHandle};
pub use queue::{EventQueue, QueueFull, QueuedEvent};
pub use registry::ComponentRegistry;
pub use router::{Router, RouterStats};
pub use service::OrchestratorService;
pub use subscribers::SubscriberSet;
pub use watcher::OutcomeWatcher;

use std::time::Duration;

use gladys_core::env;

/// Source tag that bypasses salience scoring and episodic persistence.
pub const SYSTEM_METRICS_SOURCE: &str = "system.metrics";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Aggregate salience at or above which unmatched events take the
    /// slow path.
    pub high_threshold: f64,
    /// Novelty of the fallback vector used when the gateway is
    /// unreachable. Configure at or above `high_threshold` to fail open
    /// (everything deliberated), below to fail closed.
    pub fallback_novelty: f64,
    /// Priority assigned to events the sensor did not pre-score.
    pub default_priority: f64,
    /// Bounded priority-queue capacity.
    pub queue_capacity: usize,
    /// How long a heuristic fire waits for feedback before expiring.
    pub outcome_deadline: Duration,
    /// Heartbeat silence after which a component is marked dead.
    pub heartbeat_dead_after: Duration,
    /// Interval between batch drains of accumulated low-salience events.
    pub moment_flush_interval: Duration,
    /// Batch size that forces an early drain.
    pub moment_max_events: usize,
    /// Per-subscriber channel depth; a subscriber that falls this far
    /// behind is dropped.
    pub subscriber_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.7,
            fallback_novelty: 0.5,
            default_priority: 0.5,
            queue_capacity: 1024,
            outcome_deadline: Duration::from_secs(60),
            heartbeat_dead_after: Duration::from_secs(30),
            moment_flush_interval: Duration::from_secs(30),
            moment_max_events: 50,
            subscriber_buffer: 256,
        }
    }
}

impl OrchestratorConfig {
    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            high_threshold: env::env_f64_or_default(
                env::SALIENCE_HIGH_THRESHOLD,
                defaults.high_threshold,
            ),
            fallback_novelty: env::env_f64_or_default(
                env::SALIENCE_FALLBACK_NOVELTY,
                defaults.fallback_novelty,
            ),
            queue_capacity: env::env_usize_or_default(
                env::QUEUE_CAPACITY,
                defaults.queue_capacity,
            ),
            outcome_deadline: Duration::from_millis(env::env_u64_or_default(
                env::OUTCOME_DEADLINE_MS,
                defaults.outcome_deadline.as_millis() as u64,
            )),
            heartbeat_dead_after: Duration::from_millis(env::env_u64_or_default(
                env::HEARTBEAT_DEAD_AFTER_MS,
                defaults.heartbeat_dead_after.as_millis() as u64,
            )),
            moment_flush_interval: Duration::from_millis(env::env_u64_or_default(
                env::MOMENT_FLUSH_MS,
                defaults.moment_flush_interval.as_millis() as u64,
            )),
            ..defaults
        }
    }
}
