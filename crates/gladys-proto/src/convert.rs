//! Conversions between wire types and `gladys-core` domain types.
//!
//! Wire fields use empty strings and zero timestamps for "absent";
//! domain types use `Option`. Malformed JSON payloads are logged at WARN
//! and dropped rather than failing the enclosing request.

use std::collections::BTreeMap;

use gladys_core::component::{
    ComponentCapabilities, ComponentCommand, ComponentState, PendingCommand, TransportMode,
};
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::{FeedbackEvent, FeedbackTargetType};
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::{
    Event, Heuristic, HeuristicAction, HeuristicCondition, HeuristicOrigin, RequestMeta,
    SalienceVector,
};
use tracing::warn;

use crate::v1;

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn none_if_zero(ms: i64) -> Option<i64> {
    if ms == 0 {
        None
    } else {
        Some(ms)
    }
}

/// Parse a JSON payload field, logging and dropping malformed input.
#[must_use]
pub fn parse_json_field(raw: &str, context: &str) -> Option<serde_json::Value> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(context, error = %err, "dropping malformed JSON payload");
            None
        }
    }
}

// =============================================================================
// RequestMeta
// =============================================================================

impl From<v1::RequestMeta> for RequestMeta {
    fn from(m: v1::RequestMeta) -> Self {
        Self {
            request_id: m.request_id,
            trace_id: m.trace_id,
            span_id: m.span_id,
            timestamp_ms: m.timestamp_ms,
            source_component: m.source_component,
        }
    }
}

impl From<RequestMeta> for v1::RequestMeta {
    fn from(m: RequestMeta) -> Self {
        Self {
            request_id: m.request_id,
            trace_id: m.trace_id,
            span_id: m.span_id,
            timestamp_ms: m.timestamp_ms,
            source_component: m.source_component,
        }
    }
}

// =============================================================================
// SalienceVector
// =============================================================================

impl From<v1::SalienceVector> for SalienceVector {
    fn from(v: v1::SalienceVector) -> Self {
        let mut out = Self {
            dimensions: BTreeMap::new(),
            threat: v.threat.clamp(0.0, 1.0),
            salience: v.salience.clamp(0.0, 1.0),
            habituation: v.habituation.clamp(0.0, 1.0),
            model_id: v.model_id,
        };
        for (name, value) in v.dimensions {
            out.set_dimension(&name, value);
        }
        out
    }
}

impl From<SalienceVector> for v1::SalienceVector {
    fn from(v: SalienceVector) -> Self {
        Self {
            dimensions: v.dimensions.into_iter().collect(),
            threat: v.threat,
            salience: v.salience,
            habituation: v.habituation,
            model_id: v.model_id,
        }
    }
}

// =============================================================================
// Event / EpisodicEvent
// =============================================================================

impl From<v1::Event> for Event {
    fn from(e: v1::Event) -> Self {
        Self {
            structured: parse_json_field(&e.structured_json, "event.structured_json"),
            id: e.id,
            timestamp_ms: e.timestamp_ms,
            source: e.source,
            raw_text: e.raw_text,
            salience: e.salience.map(Into::into),
            entity_ids: e.entity_ids,
            tokenizer_id: e.tokenizer_id,
            token_ids: e.token_ids,
            meta: e.meta.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<Event> for v1::Event {
    fn from(e: Event) -> Self {
        Self {
            structured_json: e
                .structured
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            id: e.id,
            timestamp_ms: e.timestamp_ms,
            source: e.source,
            raw_text: e.raw_text,
            salience: e.salience.map(Into::into),
            entity_ids: e.entity_ids,
            tokenizer_id: e.tokenizer_id,
            token_ids: e.token_ids,
            meta: Some(e.meta.into()),
        }
    }
}

impl From<v1::EpisodicEvent> for EpisodicEvent {
    fn from(e: v1::EpisodicEvent) -> Self {
        Self {
            event: e.event.map(Into::into).unwrap_or_default(),
            embedding: e.embedding,
            salience: e.salience.map(Into::into),
            archived: e.archived,
            access_count: e.access_count,
            predicted_success: e.predicted_success,
            prediction_confidence: e.prediction_confidence,
            response_id: none_if_empty(e.response_id),
            response_text: none_if_empty(e.response_text),
            matched_heuristic_id: none_if_empty(e.matched_heuristic_id),
            decision_path: none_if_empty(e.decision_path),
            episode_id: none_if_empty(e.episode_id),
        }
    }
}

impl From<EpisodicEvent> for v1::EpisodicEvent {
    fn from(e: EpisodicEvent) -> Self {
        Self {
            event: Some(e.event.into()),
            embedding: e.embedding,
            salience: e.salience.map(Into::into),
            archived: e.archived,
            access_count: e.access_count,
            predicted_success: e.predicted_success,
            prediction_confidence: e.prediction_confidence,
            response_id: e.response_id.unwrap_or_default(),
            response_text: e.response_text.unwrap_or_default(),
            matched_heuristic_id: e.matched_heuristic_id.unwrap_or_default(),
            decision_path: e.decision_path.unwrap_or_default(),
            episode_id: e.episode_id.unwrap_or_default(),
        }
    }
}

// =============================================================================
// Heuristics
// =============================================================================

impl From<v1::HeuristicOrigin> for HeuristicOrigin {
    fn from(o: v1::HeuristicOrigin) -> Self {
        match o {
            v1::HeuristicOrigin::BuiltIn => Self::BuiltIn,
            v1::HeuristicOrigin::Pack => Self::Pack,
            v1::HeuristicOrigin::User => Self::User,
            v1::HeuristicOrigin::Learned | v1::HeuristicOrigin::Unspecified => Self::Learned,
        }
    }
}

impl From<HeuristicOrigin> for v1::HeuristicOrigin {
    fn from(o: HeuristicOrigin) -> Self {
        match o {
            HeuristicOrigin::BuiltIn => Self::BuiltIn,
            HeuristicOrigin::Pack => Self::Pack,
            HeuristicOrigin::Learned => Self::Learned,
            HeuristicOrigin::User => Self::User,
        }
    }
}

impl From<v1::Heuristic> for Heuristic {
    fn from(h: v1::Heuristic) -> Self {
        let origin = h.origin().into();
        let source = none_if_empty(h.condition.as_ref().map(|c| c.source.clone()).unwrap_or_default())
            .or_else(|| none_if_empty(h.source.clone()));
        Self {
            condition: HeuristicCondition {
                text: h.condition.as_ref().map(|c| c.text.clone()).unwrap_or_default(),
                source: source.clone(),
            },
            action: HeuristicAction {
                message: h.action.as_ref().map(|a| a.message.clone()).unwrap_or_default(),
                extra: h
                    .action
                    .as_ref()
                    .and_then(|a| parse_json_field(&a.extra_json, "heuristic.action.extra_json")),
            },
            id: h.id,
            name: h.name,
            condition_embedding: h.condition_embedding,
            similarity_threshold: h.similarity_threshold,
            confidence: h.confidence,
            alpha: h.alpha,
            beta: h.beta,
            fire_count: h.fire_count,
            success_count: h.success_count,
            origin,
            origin_id: none_if_empty(h.origin_id),
            source,
            frozen: false,
            last_fired_ms: none_if_zero(h.last_fired_ms),
            last_accessed_ms: none_if_zero(h.last_accessed_ms),
            created_at_ms: h.created_at_ms,
            updated_at_ms: h.updated_at_ms,
        }
    }
}

impl From<Heuristic> for v1::Heuristic {
    fn from(h: Heuristic) -> Self {
        Self {
            condition: Some(v1::HeuristicCondition {
                text: h.condition.text,
                source: h.condition.source.unwrap_or_default(),
            }),
            action: Some(v1::HeuristicAction {
                message: h.action.message,
                extra_json: h
                    .action
                    .extra
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            }),
            id: h.id,
            name: h.name,
            condition_embedding: h.condition_embedding,
            similarity_threshold: h.similarity_threshold,
            confidence: h.confidence,
            alpha: h.alpha,
            beta: h.beta,
            fire_count: h.fire_count,
            success_count: h.success_count,
            origin: v1::HeuristicOrigin::from(h.origin) as i32,
            origin_id: h.origin_id.unwrap_or_default(),
            source: h.source.unwrap_or_default(),
            last_fired_ms: h.last_fired_ms.unwrap_or(0),
            last_accessed_ms: h.last_accessed_ms.unwrap_or(0),
            created_at_ms: h.created_at_ms,
            updated_at_ms: h.updated_at_ms,
        }
    }
}

// =============================================================================
// Fires and feedback
// =============================================================================

impl From<v1::FireOutcome> for FireOutcome {
    fn from(o: v1::FireOutcome) -> Self {
        match o {
            v1::FireOutcome::Success => Self::Success,
            v1::FireOutcome::Fail => Self::Fail,
            v1::FireOutcome::Unknown => Self::Unknown,
        }
    }
}

impl From<FireOutcome> for v1::FireOutcome {
    fn from(o: FireOutcome) -> Self {
        match o {
            FireOutcome::Success => Self::Success,
            FireOutcome::Fail => Self::Fail,
            FireOutcome::Unknown => Self::Unknown,
        }
    }
}

/// Wire feedback source → domain. `Unspecified` means "not attributed".
#[must_use]
pub fn feedback_source_from_wire(s: v1::FeedbackSource) -> Option<FeedbackSource> {
    match s {
        v1::FeedbackSource::Explicit => Some(FeedbackSource::Explicit),
        v1::FeedbackSource::Implicit => Some(FeedbackSource::Implicit),
        v1::FeedbackSource::Unspecified => None,
    }
}

/// Domain feedback source → wire.
#[must_use]
pub fn feedback_source_to_wire(s: Option<FeedbackSource>) -> v1::FeedbackSource {
    match s {
        Some(FeedbackSource::Explicit) => v1::FeedbackSource::Explicit,
        Some(FeedbackSource::Implicit) => v1::FeedbackSource::Implicit,
        None => v1::FeedbackSource::Unspecified,
    }
}

impl From<v1::FeedbackTargetType> for FeedbackTargetType {
    fn from(t: v1::FeedbackTargetType) -> Self {
        match t {
            v1::FeedbackTargetType::Heuristic => Self::Heuristic,
            v1::FeedbackTargetType::Pattern => Self::Pattern,
            v1::FeedbackTargetType::Action | v1::FeedbackTargetType::Unspecified => Self::Action,
        }
    }
}

impl From<FeedbackTargetType> for v1::FeedbackTargetType {
    fn from(t: FeedbackTargetType) -> Self {
        match t {
            FeedbackTargetType::Action => Self::Action,
            FeedbackTargetType::Heuristic => Self::Heuristic,
            FeedbackTargetType::Pattern => Self::Pattern,
        }
    }
}

impl From<v1::FeedbackEvent> for FeedbackEvent {
    fn from(f: v1::FeedbackEvent) -> Self {
        let target_type = f.target_type().into();
        Self {
            id: f.id,
            target_type,
            target_id: f.target_id,
            feedback_type: f.feedback_type,
            feedback_value: f.feedback_value.clamp(-1.0, 1.0),
            weight: f.weight.clamp(0.0, 1.0),
            processed: f.processed,
            created_at_ms: f.created_at_ms,
        }
    }
}

impl From<FeedbackEvent> for v1::FeedbackEvent {
    fn from(f: FeedbackEvent) -> Self {
        Self {
            target_type: v1::FeedbackTargetType::from(f.target_type) as i32,
            id: f.id,
            target_id: f.target_id,
            feedback_type: f.feedback_type,
            feedback_value: f.feedback_value,
            weight: f.weight,
            processed: f.processed,
            created_at_ms: f.created_at_ms,
        }
    }
}

// =============================================================================
// Components
// =============================================================================

impl From<v1::ComponentState> for ComponentState {
    fn from(s: v1::ComponentState) -> Self {
        match s {
            v1::ComponentState::Starting => Self::Starting,
            v1::ComponentState::Active => Self::Active,
            v1::ComponentState::Paused => Self::Paused,
            v1::ComponentState::Stopping => Self::Stopping,
            v1::ComponentState::Stopped => Self::Stopped,
            v1::ComponentState::Error => Self::Error,
            v1::ComponentState::Dead => Self::Dead,
            v1::ComponentState::Unknown => Self::Unknown,
        }
    }
}

impl From<ComponentState> for v1::ComponentState {
    fn from(s: ComponentState) -> Self {
        match s {
            ComponentState::Starting => Self::Starting,
            ComponentState::Active => Self::Active,
            ComponentState::Paused => Self::Paused,
            ComponentState::Stopping => Self::Stopping,
            ComponentState::Stopped => Self::Stopped,
            ComponentState::Error => Self::Error,
            ComponentState::Dead => Self::Dead,
            ComponentState::Unknown => Self::Unknown,
        }
    }
}

impl From<v1::TransportMode> for TransportMode {
    fn from(m: v1::TransportMode) -> Self {
        match m {
            v1::TransportMode::Streaming => Self::Streaming,
            v1::TransportMode::Batched => Self::Batched,
            v1::TransportMode::Event | v1::TransportMode::Unspecified => Self::Event,
        }
    }
}

impl From<TransportMode> for v1::TransportMode {
    fn from(m: TransportMode) -> Self {
        match m {
            TransportMode::Streaming => Self::Streaming,
            TransportMode::Batched => Self::Batched,
            TransportMode::Event => Self::Event,
        }
    }
}

/// Wire command → domain. `Unspecified` is rejected by callers.
#[must_use]
pub fn command_from_wire(c: v1::ComponentCommand) -> Option<ComponentCommand> {
    match c {
        v1::ComponentCommand::Start => Some(ComponentCommand::Start),
        v1::ComponentCommand::Stop => Some(ComponentCommand::Stop),
        v1::ComponentCommand::Pause => Some(ComponentCommand::Pause),
        v1::ComponentCommand::Resume => Some(ComponentCommand::Resume),
        v1::ComponentCommand::Reload => Some(ComponentCommand::Reload),
        v1::ComponentCommand::HealthCheck => Some(ComponentCommand::HealthCheck),
        v1::ComponentCommand::Recover => Some(ComponentCommand::Recover),
        v1::ComponentCommand::Unspecified => None,
    }
}

/// Domain command → wire.
#[must_use]
pub fn command_to_wire(c: ComponentCommand) -> v1::ComponentCommand {
    match c {
        ComponentCommand::Start => v1::ComponentCommand::Start,
        ComponentCommand::Stop => v1::ComponentCommand::Stop,
        ComponentCommand::Pause => v1::ComponentCommand::Pause,
        ComponentCommand::Resume => v1::ComponentCommand::Resume,
        ComponentCommand::Reload => v1::ComponentCommand::Reload,
        ComponentCommand::HealthCheck => v1::ComponentCommand::HealthCheck,
        ComponentCommand::Recover => v1::ComponentCommand::Recover,
    }
}

impl From<v1::ComponentCapabilities> for ComponentCapabilities {
    fn from(c: v1::ComponentCapabilities) -> Self {
        let transport_mode = c.transport_mode().into();
        Self {
            transport_mode,
            supported_commands: c
                .supported_commands
                .iter()
                .filter_map(|&i| {
                    v1::ComponentCommand::try_from(i)
                        .ok()
                        .and_then(command_from_wire)
                })
                .collect(),
            instance_policy: c.instance_policy,
        }
    }
}

impl From<ComponentCapabilities> for v1::ComponentCapabilities {
    fn from(c: ComponentCapabilities) -> Self {
        Self {
            transport_mode: v1::TransportMode::from(c.transport_mode) as i32,
            supported_commands: c
                .supported_commands
                .into_iter()
                .map(|cmd| command_to_wire(cmd) as i32)
                .collect(),
            instance_policy: c.instance_policy,
        }
    }
}

impl From<PendingCommand> for v1::PendingCommand {
    fn from(p: PendingCommand) -> Self {
        Self {
            command_id: p.command_id,
            command: command_to_wire(p.command) as i32,
            args: p.args.into_iter().collect(),
        }
    }
}
