//! Sensor events and the request envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::salience::SalienceVector;

/// Request envelope carried on every RPC; the trace id survives every
/// service hop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub timestamp_ms: i64,
    pub source_component: String,
}

impl RequestMeta {
    /// Fresh envelope for an internally originated request.
    #[must_use]
    pub fn internal(source_component: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            span_id: String::new(),
            timestamp_ms: crate::now_ms(),
            source_component: source_component.to_string(),
        }
    }

    /// Child envelope sharing this request's trace id.
    #[must_use]
    pub fn child(&self, source_component: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: self.trace_id.clone(),
            span_id: self.request_id.clone(),
            timestamp_ms: crate::now_ms(),
            source_component: source_component.to_string(),
        }
    }
}

/// An immutable sensor event.
///
/// Events are emitted by sensors, consumed once by the orchestrator's
/// routing pipeline, and persisted by the Memory Store as episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp_ms: i64,
    /// Domain tag, e.g. `minecraft`, `gmail`.
    pub source: String,
    pub raw_text: String,
    /// Schema-free payload; `None` when the sensor sent none.
    pub structured: Option<serde_json::Value>,
    /// Present when the sensor pre-scored the event.
    pub salience: Option<SalienceVector>,
    pub entity_ids: Vec<String>,
    pub tokenizer_id: String,
    pub token_ids: Vec<u32>,
    pub meta: RequestMeta,
}

impl Event {
    /// Minimal event for the given source and text, with a fresh id.
    #[must_use]
    pub fn new(source: &str, raw_text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: crate::now_ms(),
            source: source.to_string(),
            raw_text: raw_text.to_string(),
            ..Self::default()
        }
    }

    /// A string field from the structured payload, if present.
    #[must_use]
    pub fn structured_str(&self, key: &str) -> Option<&str> {
        self.structured.as_ref()?.get(key)?.as_str()
    }
}

/// Outcome of processing a single event, as persisted with the episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionPath {
    /// A heuristic matched; the LLM was bypassed.
    Fast,
    /// Routed to the executive for deliberation.
    Slow,
    /// Accumulated for a periodic batch drain.
    Batch,
}

impl DecisionPath {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::Batch => "batch",
        }
    }
}

impl std::str::FromStr for DecisionPath {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            "batch" => Ok(Self::Batch),
            other => Err(crate::CoreError::invalid(
                "decision_path",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

/// An event as persisted, with everything learned about it downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub event: Event,
    pub embedding: Vec<f32>,
    pub salience: Option<SalienceVector>,
    pub archived: bool,
    pub access_count: u64,
    pub predicted_success: f64,
    pub prediction_confidence: f64,
    pub response_id: Option<String>,
    pub response_text: Option<String>,
    pub matched_heuristic_id: Option<String>,
    pub decision_path: Option<String>,
    pub episode_id: Option<String>,
}

impl EpisodicEvent {
    /// Wrap a bare event with no downstream annotations yet.
    #[must_use]
    pub fn from_event(event: Event) -> Self {
        Self {
            event,
            ..Self::default()
        }
    }
}
