//! Seams to the other core services.
//!
//! The router and service talk to the gateway, executive, and memory
//! store through these traits; production wires in the gRPC clients,
//! tests wire in in-process services.

use async_trait::async_trait;
use gladys_client::executive::{Deliberation, FeedbackOutcome};
use gladys_client::salience::SalienceEvaluation;
use gladys_client::ClientError;
use gladys_core::event::EpisodicEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::{Event, RequestMeta};

/// Salience Gateway seam.
#[async_trait]
pub trait GatewayHandle: Send + Sync {
    async fn evaluate(&self, event: &Event) -> Result<SalienceEvaluation, ClientError>;
    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError>;
}

#[async_trait]
impl GatewayHandle for gladys_client::SalienceClient {
    async fn evaluate(&self, event: &Event) -> Result<SalienceEvaluation, ClientError> {
        Self::evaluate(self, event).await
    }

    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError> {
        Self::health(self, meta).await
    }
}

/// Executive seam.
#[async_trait]
pub trait ExecutiveHandle: Send + Sync {
    async fn process_event(&self, event: Event, immediate: bool)
        -> Result<Deliberation, ClientError>;

    async fn process_moment(
        &self,
        meta: &RequestMeta,
        events: Vec<Event>,
    ) -> Result<Deliberation, ClientError>;

    async fn provide_feedback(
        &self,
        meta: &RequestMeta,
        event_id: &str,
        positive: bool,
        response_id: Option<&str>,
    ) -> Result<FeedbackOutcome, ClientError>;

    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError>;
}

#[async_trait]
impl ExecutiveHandle for gladys_client::ExecutiveClient {
    async fn process_event(
        &self,
        event: Event,
        immediate: bool,
    ) -> Result<Deliberation, ClientError> {
        Self::process_event(self, event, immediate).await
    }

    async fn process_moment(
        &self,
        meta: &RequestMeta,
        events: Vec<Event>,
    ) -> Result<Deliberation, ClientError> {
        Self::process_moment(self, meta, events).await
    }

    async fn provide_feedback(
        &self,
        meta: &RequestMeta,
        event_id: &str,
        positive: bool,
        response_id: Option<&str>,
    ) -> Result<FeedbackOutcome, ClientError> {
        Self::provide_feedback(self, meta, event_id, positive, response_id).await
    }

    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError> {
        Self::health(self, meta).await
    }
}

/// Memory Store seam (the slice the orchestrator needs).
#[async_trait]
pub trait MemoryHandle: Send + Sync {
    async fn store_episode(
        &self,
        meta: &RequestMeta,
        episode: EpisodicEvent,
    ) -> Result<(), ClientError>;

    async fn record_fire(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        event_id: &str,
        episodic_event_id: Option<&str>,
    ) -> Result<String, ClientError>;

    async fn resolve_fire(
        &self,
        meta: &RequestMeta,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<(), ClientError>;

    async fn update_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<(), ClientError>;

    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError>;
}

#[async_trait]
impl MemoryHandle for gladys_client::MemoryClient {
    async fn store_episode(
        &self,
        meta: &RequestMeta,
        episode: EpisodicEvent,
    ) -> Result<(), ClientError> {
        Self::store_episode(self, meta, episode).await
    }

    async fn record_fire(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        event_id: &str,
        episodic_event_id: Option<&str>,
    ) -> Result<String, ClientError> {
        Self::record_heuristic_fire(self, meta, heuristic_id, event_id, episodic_event_id).await
    }

    async fn resolve_fire(
        &self,
        meta: &RequestMeta,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<(), ClientError> {
        Self::resolve_heuristic_fire(self, meta, fire_id, outcome, feedback_source).await
    }

    async fn update_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<(), ClientError> {
        Self::update_heuristic_confidence(
            self,
            meta,
            heuristic_id,
            positive,
            feedback_source,
            weight,
        )
        .await
        .map(|_| ())
    }

    async fn health(&self, meta: &RequestMeta) -> Result<bool, ClientError> {
        Self::health(self, meta).await
    }
}
