//! Outcome watcher: matches pending heuristic fires to later feedback.
//!
//! Every fast-path fire registers here with a deadline. Explicit
//! feedback or a correlated downstream signal resolves it; fires that
//! outlive the deadline are marked outcome-unknown. The pending list is
//! mutex-guarded: registration, resolution, and the expiry scan all
//! serialize on it.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

/// A fire awaiting its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFire {
    pub fire_id: String,
    pub heuristic_id: String,
    pub event_id: String,
    pub deadline_ms: i64,
}

/// Mutex-guarded pending-fire list.
pub struct OutcomeWatcher {
    pending: Mutex<Vec<PendingFire>>,
    deadline: Duration,
}

impl OutcomeWatcher {
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            deadline,
        }
    }

    /// Track a fresh fire until feedback or expiry.
    pub async fn register_fire(&self, fire_id: &str, heuristic_id: &str, event_id: &str) {
        let pending = PendingFire {
            fire_id: fire_id.to_string(),
            heuristic_id: heuristic_id.to_string(),
            event_id: event_id.to_string(),
            deadline_ms: gladys_core::now_ms() + self.deadline.as_millis() as i64,
        };
        debug!(fire_id, event_id, "fire registered with outcome watcher");
        self.pending.lock().await.push(pending);
    }

    /// Take every pending fire for the event. Feedback resolves all of
    /// them at once; an event that registered nothing yields nothing.
    pub async fn take_for_event(&self, event_id: &str) -> Vec<PendingFire> {
        let mut pending = self.pending.lock().await;
        let (resolved, keep): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|fire| fire.event_id == event_id);
        *pending = keep;
        resolved
    }

    /// Remove and return fires past their deadline.
    pub async fn take_expired(&self) -> Vec<PendingFire> {
        let now = gladys_core::now_ms();
        let mut pending = self.pending.lock().await;
        let (expired, keep): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|fire| fire.deadline_ms <= now);
        *pending = keep;
        expired
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
