//! The routing worker.
//!
//! Pops the highest-priority event and runs it through the pipeline:
//! salience evaluation (with graceful degradation), fast/slow/batch
//! routing, episode persistence, fire auditing, and subscriber fan-out.
//! Fire records are written after the persist and before fan-out, so a
//! subscriber never sees an event whose audit trail is missing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gladys_core::event::{DecisionPath, EpisodicEvent};
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::task::spawn_logged;
use gladys_core::{Event, RequestMeta, SalienceVector};
use gladys_proto::v1::SubscribedEvent;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clients::{ExecutiveHandle, GatewayHandle, MemoryHandle};
use crate::queue::{EventQueue, QueuedEvent};
use crate::subscribers::SubscriberSet;
use crate::watcher::OutcomeWatcher;
use crate::{OrchestratorConfig, SYSTEM_METRICS_SOURCE};

/// Weight of an implicit outcome observation relative to explicit
/// feedback.
const IMPLICIT_WEIGHT: f64 = 0.5;

/// Model id stamped on fallback vectors minted by the orchestrator.
const FALLBACK_MODEL_ID: &str = "orchestrator-fallback/v1";

/// Counters surfaced by `SystemStatus`.
#[derive(Debug, Default)]
pub struct RouterStats {
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_processed: AtomicU64,
    pub fast_path_hits: AtomicU64,
    pub slow_path_dispatches: AtomicU64,
}

/// The background routing worker.
pub struct Router {
    queue: Arc<EventQueue>,
    gateway: Arc<dyn GatewayHandle>,
    executive: Arc<dyn ExecutiveHandle>,
    memory: Arc<dyn MemoryHandle>,
    subscribers: Arc<SubscriberSet>,
    watcher: Arc<OutcomeWatcher>,
    stats: Arc<RouterStats>,
    batch: Mutex<Vec<Event>>,
    config: OrchestratorConfig,
}

impl Router {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<EventQueue>,
        gateway: Arc<dyn GatewayHandle>,
        executive: Arc<dyn ExecutiveHandle>,
        memory: Arc<dyn MemoryHandle>,
        subscribers: Arc<SubscriberSet>,
        watcher: Arc<OutcomeWatcher>,
        stats: Arc<RouterStats>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            queue,
            gateway,
            executive,
            memory,
            subscribers,
            watcher,
            stats,
            batch: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Worker loop: pop and process until the task is torn down.
    pub async fn run(self: Arc<Self>) {
        info!("routing worker started");
        loop {
            let queued = self.queue.pop().await;
            self.process(queued).await;
        }
    }

    /// Periodic drain of accumulated low-salience events.
    pub async fn run_moment_flusher(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.moment_flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.flush_moment().await;
        }
    }

    /// Periodic expiry of unresolved fires.
    pub async fn run_outcome_expirer(self: Arc<Self>) {
        let scan_every = (self.config.outcome_deadline / 4).max(std::time::Duration::from_secs(1));
        let mut interval = tokio::time::interval(scan_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.expire_pending_fires().await;
        }
    }

    /// Mark fires past their deadline as outcome-unknown.
    pub async fn expire_pending_fires(&self) {
        for fire in self.watcher.take_expired().await {
            debug!(fire_id = %fire.fire_id, "fire expired without feedback");
            let memory = Arc::clone(&self.memory);
            let meta = RequestMeta::internal("orchestrator");
            spawn_logged("resolve_expired_fire", async move {
                memory
                    .resolve_fire(&meta, &fire.fire_id, FireOutcome::Unknown, None)
                    .await
            });
        }
    }

    /// Drain the batch buffer into one `ProcessMoment` call.
    pub async fn flush_moment(&self) {
        let events: Vec<Event> = {
            let mut batch = self.batch.lock().await;
            std::mem::take(&mut *batch)
        };
        if events.is_empty() {
            return;
        }
        debug!(count = events.len(), "flushing moment");
        let meta = RequestMeta::internal("orchestrator");
        match self.executive.process_moment(&meta, events).await {
            Ok(deliberation) => {
                if let Some(err) = deliberation.error_message {
                    warn!(error = %err, "moment processing degraded");
                }
            }
            Err(e) => warn!(error = %e, "moment processing failed"),
        }
    }

    async fn evaluate_salience(&self, event: &Event) -> (SalienceVector, Option<String>, Option<String>, bool) {
        // (salience, matched_heuristic_id, matched_action, from_cache)
        if let Some(pre_scored) = &event.salience {
            return (pre_scored.clone(), None, None, false);
        }
        match self.gateway.evaluate(event).await {
            Ok(evaluation) => (
                evaluation.salience,
                evaluation.matched_heuristic_id,
                evaluation.matched_action,
                evaluation.from_cache,
            ),
            Err(e) => {
                // Graceful degradation: score with the configured
                // fallback vector rather than stalling intake.
                warn!(event_id = %event.id, error = %e, "salience gateway unreachable; using fallback vector");
                (
                    SalienceVector::fallback(self.config.fallback_novelty, FALLBACK_MODEL_ID),
                    None,
                    None,
                    false,
                )
            }
        }
    }

    /// Resolve pending fires named by a correlated downstream signal.
    async fn apply_implicit_outcome(&self, event: &Event) {
        let Some(target_event) = event.structured_str("outcome_for") else {
            return;
        };
        let positive = event.structured_str("outcome") == Some("success");
        for fire in self.watcher.take_for_event(target_event).await {
            info!(
                fire_id = %fire.fire_id,
                target_event,
                positive,
                "implicit outcome resolved"
            );
            let memory = Arc::clone(&self.memory);
            let meta = event.meta.child("orchestrator");
            spawn_logged("resolve_implicit_fire", async move {
                let outcome = if positive {
                    FireOutcome::Success
                } else {
                    FireOutcome::Fail
                };
                memory
                    .resolve_fire(
                        &meta,
                        &fire.fire_id,
                        outcome,
                        Some(FeedbackSource::Implicit),
                    )
                    .await?;
                memory
                    .update_confidence(
                        &meta,
                        &fire.heuristic_id,
                        positive,
                        Some(FeedbackSource::Implicit),
                        IMPLICIT_WEIGHT,
                    )
                    .await
            });
        }
    }

    /// Route one popped event through the pipeline.
    pub async fn process(&self, queued: QueuedEvent) {
        let event = queued.event;
        self.stats.events_processed.fetch_add(1, Ordering::Relaxed);

        // Internal telemetry bypasses salience and persistence entirely.
        if event.source == SYSTEM_METRICS_SOURCE {
            debug!(event_id = %event.id, "system metrics event");
            return;
        }

        self.apply_implicit_outcome(&event).await;

        let (salience, matched_heuristic_id, matched_action, _from_cache) =
            self.evaluate_salience(&event).await;

        // Threat pre-empts everything, including the fast path; a
        // recognized situation that is also dangerous still gets
        // deliberation.
        let path = if salience.is_threat() {
            DecisionPath::Slow
        } else if matched_heuristic_id.is_some() {
            DecisionPath::Fast
        } else if salience.salience >= self.config.high_threshold {
            DecisionPath::Slow
        } else {
            DecisionPath::Batch
        };

        let meta = event.meta.child("orchestrator");
        let mut episode = EpisodicEvent::from_event(event.clone());
        episode.salience = Some(salience.clone());
        episode.matched_heuristic_id = matched_heuristic_id.clone();
        episode.decision_path = Some(path.as_str().to_string());

        match path {
            DecisionPath::Slow => {
                self.stats.slow_path_dispatches.fetch_add(1, Ordering::Relaxed);
                match self.executive.process_event(event.clone(), true).await {
                    Ok(deliberation) => {
                        if let Some(err) = &deliberation.error_message {
                            warn!(event_id = %event.id, error = %err, "deliberation degraded");
                        }
                        if !deliberation.response_id.is_empty() {
                            episode.response_id = Some(deliberation.response_id);
                        }
                        if !deliberation.response_text.is_empty() {
                            episode.response_text = Some(deliberation.response_text);
                        }
                        episode.predicted_success = deliberation.predicted_success;
                        episode.prediction_confidence = deliberation.prediction_confidence;
                    }
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "slow-path dispatch failed");
                    }
                }
            }
            DecisionPath::Fast => {
                self.stats.fast_path_hits.fetch_add(1, Ordering::Relaxed);
                episode.response_text = matched_action;
            }
            DecisionPath::Batch => {
                let mut batch = self.batch.lock().await;
                batch.push(event.clone());
                if batch.len() >= self.config.moment_max_events {
                    drop(batch);
                    self.flush_moment().await;
                }
            }
        }

        // Persist the episode. Failures are logged and counted; the
        // publish was already acked at admission.
        if let Err(e) = self.memory.store_episode(&meta, episode.clone()).await {
            warn!(event_id = %event.id, error = %e, "episode persistence failed");
        }

        // Fire record after the persist, before subscriber delivery.
        if let Some(heuristic_id) = &matched_heuristic_id {
            match self
                .memory
                .record_fire(&meta, heuristic_id, &event.id, Some(&event.id))
                .await
            {
                Ok(fire_id) => {
                    self.watcher
                        .register_fire(&fire_id, heuristic_id, &event.id)
                        .await;
                }
                Err(e) => {
                    warn!(event_id = %event.id, heuristic_id = %heuristic_id, error = %e, "fire recording failed");
                }
            }
        }

        self.subscribers
            .fan_out(&SubscribedEvent {
                event: Some(event.into()),
                salience: Some(salience.into()),
                matched_heuristic_id: matched_heuristic_id.unwrap_or_default(),
                decision_path: path.as_str().to_string(),
            })
            .await;
    }

    /// Pending batch size (for status and tests).
    pub async fn batch_len(&self) -> usize {
        self.batch.lock().await.len()
    }

    #[must_use]
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}
