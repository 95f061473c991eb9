//! gRPC service implementation for the Executive.

use std::sync::Arc;

use async_trait::async_trait;
use gladys_client::memory::ConfidenceUpdate;
use gladys_core::event::EpisodicEvent;
use gladys_core::feedback::{FeedbackEvent, FeedbackTargetType};
use gladys_core::fire::FeedbackSource;
use gladys_core::heuristic::{Heuristic, HeuristicAction, HeuristicCondition, HeuristicOrigin};
use gladys_core::{Event, RequestMeta};
use gladys_proto::v1::{
    self, executive_server::Executive as ExecutiveGrpc, HealthRequest, HealthResponse,
    ProcessEventRequest, ProcessEventResponse, ProcessMomentRequest, ProcessMomentResponse,
    ProvideFeedbackRequest, ProvideFeedbackResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::extraction::{extraction_prompt, parse_extraction};
use crate::llm::{ChatMessage, ChatModel, LlmError};
use crate::ExecutiveConfig;

/// The executive's window into the Memory Store. Backed by
/// [`gladys_client::MemoryClient`] in production; tests substitute an
/// in-process adapter.
#[async_trait]
pub trait MemoryAccess: Send + Sync {
    async fn get_episode(
        &self,
        meta: &RequestMeta,
        event_id: &str,
    ) -> Result<Option<EpisodicEvent>, gladys_client::ClientError>;

    async fn generate_embedding(
        &self,
        meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, gladys_client::ClientError>;

    async fn query_matching_heuristics(
        &self,
        meta: &RequestMeta,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, gladys_client::ClientError>;

    async fn store_heuristic(
        &self,
        meta: &RequestMeta,
        heuristic: Heuristic,
        generate_embedding: bool,
    ) -> Result<String, gladys_client::ClientError>;

    async fn update_heuristic_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<ConfidenceUpdate, gladys_client::ClientError>;

    async fn record_feedback(
        &self,
        meta: &RequestMeta,
        feedback: FeedbackEvent,
    ) -> Result<String, gladys_client::ClientError>;
}

#[async_trait]
impl MemoryAccess for gladys_client::MemoryClient {
    async fn get_episode(
        &self,
        meta: &RequestMeta,
        event_id: &str,
    ) -> Result<Option<EpisodicEvent>, gladys_client::ClientError> {
        Self::get_episode(self, meta, event_id).await
    }

    async fn generate_embedding(
        &self,
        meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, gladys_client::ClientError> {
        Self::generate_embedding(self, meta, text).await
    }

    async fn query_matching_heuristics(
        &self,
        meta: &RequestMeta,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, gladys_client::ClientError> {
        Self::query_matching_heuristics(
            self,
            meta,
            embedding,
            None,
            source,
            min_similarity,
            min_confidence,
            limit,
        )
        .await
    }

    async fn store_heuristic(
        &self,
        meta: &RequestMeta,
        heuristic: Heuristic,
        generate_embedding: bool,
    ) -> Result<String, gladys_client::ClientError> {
        Self::store_heuristic(self, meta, heuristic, generate_embedding).await
    }

    async fn update_heuristic_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<ConfidenceUpdate, gladys_client::ClientError> {
        Self::update_heuristic_confidence(
            self,
            meta,
            heuristic_id,
            positive,
            feedback_source,
            weight,
        )
        .await
    }

    async fn record_feedback(
        &self,
        meta: &RequestMeta,
        feedback: FeedbackEvent,
    ) -> Result<String, gladys_client::ClientError> {
        Self::record_feedback_event(self, meta, feedback).await
    }
}

/// One deliberation outcome, parsed leniently from the model reply.
#[derive(Debug, Clone)]
struct Deliberation {
    response_text: String,
    predicted_success: f64,
    prediction_confidence: f64,
}

#[derive(Deserialize)]
struct RawDeliberation {
    response: String,
    predicted_success: Option<f64>,
    prediction_confidence: Option<f64>,
}

/// Parse the model reply. Models that ignore the JSON instruction still
/// produce a usable response with default prediction metadata.
fn parse_deliberation(reply: &str) -> Deliberation {
    let fallback = |text: &str| Deliberation {
        response_text: text.trim().to_string(),
        predicted_success: 0.5,
        prediction_confidence: 0.3,
    };

    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return fallback(reply);
    };
    if end < start {
        return fallback(reply);
    }
    match serde_json::from_str::<RawDeliberation>(&reply[start..=end]) {
        Ok(raw) if !raw.response.trim().is_empty() => Deliberation {
            response_text: raw.response.trim().to_string(),
            predicted_success: raw
                .predicted_success
                .filter(|v| v.is_finite())
                .map_or(0.5, |v| v.clamp(0.0, 1.0)),
            prediction_confidence: raw
                .prediction_confidence
                .filter(|v| v.is_finite())
                .map_or(0.3, |v| v.clamp(0.0, 1.0)),
        },
        _ => fallback(reply),
    }
}

fn llm_error_message(err: &LlmError) -> &'static str {
    match err {
        LlmError::Unavailable(_) => "llm_unavailable",
        LlmError::Timeout => "llm_timeout",
        LlmError::InvalidResponse(_) => "llm_invalid_response",
    }
}

fn deliberation_prompt(event: &Event) -> Vec<ChatMessage> {
    let payload = event
        .structured
        .as_ref()
        .map(|p| format!("\nPayload: {p}"))
        .unwrap_or_default();
    vec![
        ChatMessage::system(
            "You are GLADyS, a local assistant observing a user's environment. \
             React to the event with one concise, actionable response. Reply \
             with a single JSON object and nothing else: \
             {\"response\": \"<your response>\", \
             \"predicted_success\": <0-1 probability the response helps>, \
             \"prediction_confidence\": <0-1 confidence in that estimate>}.",
        ),
        ChatMessage::user(format!(
            "Source: {}\nEvent: {}{payload}",
            event.source, event.raw_text
        )),
    ]
}

fn moment_prompt(events: &[Event]) -> Vec<ChatMessage> {
    let mut digest = String::new();
    for event in events {
        digest.push_str(&format!("- [{}] {}\n", event.source, event.raw_text));
    }
    vec![
        ChatMessage::system(
            "You are GLADyS, reviewing a batch of low-priority observations. \
             Summarize anything worth the user's attention in a short paragraph; \
             say \"nothing notable\" if none of it matters.",
        ),
        ChatMessage::user(digest),
    ]
}

/// The Executive service.
pub struct ExecutiveService {
    chat: Arc<dyn ChatModel>,
    memory: Arc<dyn MemoryAccess>,
    config: ExecutiveConfig,
}

impl ExecutiveService {
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatModel>,
        memory: Arc<dyn MemoryAccess>,
        config: ExecutiveConfig,
    ) -> Self {
        Self {
            chat,
            memory,
            config,
        }
    }

    async fn generate_with_budget(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        match tokio::time::timeout(self.config.llm_timeout, self.chat.generate(messages)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }

    /// Positive feedback: reinforce the matched heuristic, or extract a
    /// new one when nothing matched.
    async fn handle_positive(
        &self,
        meta: &RequestMeta,
        episode: &EpisodicEvent,
    ) -> (Option<String>, Option<String>, Option<String>) {
        // (extracted_id, updated_id, error_message)
        if let Some(matched) = &episode.matched_heuristic_id {
            match self
                .memory
                .update_heuristic_confidence(
                    meta,
                    matched,
                    true,
                    Some(FeedbackSource::Explicit),
                    self.config.explicit_weight,
                )
                .await
            {
                Ok(update) => {
                    debug!(heuristic_id = %matched, confidence = update.confidence, "reinforced");
                    return (None, Some(matched.clone()), None);
                }
                Err(e) => return (None, None, Some(e.to_string())),
            }
        }

        let response_text = episode.response_text.as_deref().unwrap_or_default();
        let reply = match self
            .generate_with_budget(&extraction_prompt(&episode.event.raw_text, response_text))
            .await
        {
            Ok(reply) => reply,
            Err(e) => return (None, None, Some(llm_error_message(&e).to_string())),
        };

        let extraction = match parse_extraction(&reply) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(error = %e, "extraction rejected");
                return (None, None, Some(e.to_string()));
            }
        };

        // Dedup gate: a near-identical same-source heuristic already
        // exists means the pattern is already learned.
        let source = if episode.event.source.is_empty() {
            None
        } else {
            Some(episode.event.source.as_str())
        };
        let embedding = match self
            .memory
            .generate_embedding(meta, &extraction.condition_text)
            .await
        {
            Ok(embedding) => embedding,
            Err(e) => return (None, None, Some(e.to_string())),
        };
        match self
            .memory
            .query_matching_heuristics(meta, &embedding, source, self.config.dedup_similarity, 0.0, 1)
            .await
        {
            Ok(existing) if !existing.is_empty() => {
                debug!(existing_id = %existing[0].0.id, "duplicate extraction rejected");
                return (None, None, Some("duplicate_heuristic".to_string()));
            }
            Ok(_) => {}
            Err(e) => return (None, None, Some(e.to_string())),
        }

        let mut heuristic = Heuristic::learned(
            &extraction.condition_text,
            HeuristicCondition {
                text: extraction.condition_text.clone(),
                source: source.map(str::to_string),
            },
            HeuristicAction {
                message: extraction.action_message.clone(),
                extra: None,
            },
        );
        heuristic.similarity_threshold = extraction.similarity_threshold;
        heuristic.origin = HeuristicOrigin::Learned;
        heuristic.origin_id = Some(episode.event.id.clone());
        heuristic.alpha = self.config.extraction_prior_alpha;
        heuristic.beta = self.config.extraction_prior_beta;
        heuristic.confidence = heuristic.alpha / (heuristic.alpha + heuristic.beta);
        heuristic.condition_embedding = embedding;

        let heuristic_id = match self.memory.store_heuristic(meta, heuristic, true).await {
            Ok(id) => id,
            Err(e) => return (None, None, Some(e.to_string())),
        };

        // The triggering feedback is the heuristic's first observation.
        if let Err(e) = self
            .memory
            .update_heuristic_confidence(
                meta,
                &heuristic_id,
                true,
                Some(FeedbackSource::Explicit),
                self.config.explicit_weight,
            )
            .await
        {
            warn!(heuristic_id = %heuristic_id, error = %e, "initial reinforcement failed");
        }

        info!(heuristic_id = %heuristic_id, "heuristic extracted from positive feedback");
        (Some(heuristic_id), None, None)
    }

    /// Negative feedback: blame the matched heuristic, if any.
    async fn handle_negative(
        &self,
        meta: &RequestMeta,
        episode: &EpisodicEvent,
    ) -> (Option<String>, Option<String>) {
        // (updated_id, error_message)
        let Some(matched) = &episode.matched_heuristic_id else {
            // Stored as a feedback event; nothing to downgrade.
            return (None, Some("no_matched_heuristic".to_string()));
        };
        match self
            .memory
            .update_heuristic_confidence(
                meta,
                matched,
                false,
                Some(FeedbackSource::Explicit),
                self.config.explicit_weight,
            )
            .await
        {
            Ok(update) => {
                debug!(heuristic_id = %matched, confidence = update.confidence, "downgraded");
                (Some(matched.clone()), None)
            }
            Err(e) => (None, Some(e.to_string())),
        }
    }
}

#[tonic::async_trait]
impl ExecutiveGrpc for ExecutiveService {
    async fn process_event(
        &self,
        request: tonic::Request<ProcessEventRequest>,
    ) -> Result<tonic::Response<ProcessEventResponse>, tonic::Status> {
        let req = request.into_inner();
        let Some(wire) = req.event else {
            return Ok(tonic::Response::new(ProcessEventResponse {
                accepted: false,
                response_id: String::new(),
                response_text: String::new(),
                predicted_success: 0.0,
                prediction_confidence: 0.0,
                error_message: "missing event".to_string(),
            }));
        };
        let event: Event = wire.into();
        debug!(event_id = %event.id, source = %event.source, immediate = req.immediate, "deliberating");

        match self.generate_with_budget(&deliberation_prompt(&event)).await {
            Ok(reply) => {
                let deliberation = parse_deliberation(&reply);
                Ok(tonic::Response::new(ProcessEventResponse {
                    accepted: true,
                    response_id: Uuid::new_v4().to_string(),
                    response_text: deliberation.response_text,
                    predicted_success: deliberation.predicted_success,
                    prediction_confidence: deliberation.prediction_confidence,
                    error_message: String::new(),
                }))
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "deliberation failed");
                Ok(tonic::Response::new(ProcessEventResponse {
                    accepted: true,
                    response_id: String::new(),
                    response_text: String::new(),
                    predicted_success: 0.0,
                    prediction_confidence: 0.0,
                    error_message: llm_error_message(&e).to_string(),
                }))
            }
        }
    }

    async fn process_moment(
        &self,
        request: tonic::Request<ProcessMomentRequest>,
    ) -> Result<tonic::Response<ProcessMomentResponse>, tonic::Status> {
        let req = request.into_inner();
        if req.events.is_empty() {
            return Ok(tonic::Response::new(ProcessMomentResponse {
                accepted: true,
                response_id: String::new(),
                response_text: String::new(),
                error_message: String::new(),
            }));
        }
        let events: Vec<Event> = req.events.into_iter().map(Into::into).collect();
        debug!(count = events.len(), "processing moment");

        match self.generate_with_budget(&moment_prompt(&events)).await {
            Ok(reply) => Ok(tonic::Response::new(ProcessMomentResponse {
                accepted: true,
                response_id: Uuid::new_v4().to_string(),
                response_text: reply.trim().to_string(),
                error_message: String::new(),
            })),
            Err(e) => Ok(tonic::Response::new(ProcessMomentResponse {
                accepted: true,
                response_id: String::new(),
                response_text: String::new(),
                error_message: llm_error_message(&e).to_string(),
            })),
        }
    }

    async fn provide_feedback(
        &self,
        request: tonic::Request<ProvideFeedbackRequest>,
    ) -> Result<tonic::Response<ProvideFeedbackResponse>, tonic::Status> {
        let req = request.into_inner();
        let meta: RequestMeta = req.meta.map(Into::into).unwrap_or_default();

        // Always record the normalized signal, even when no update follows.
        let feedback = FeedbackEvent::new(
            FeedbackTargetType::Action,
            if req.response_id.is_empty() {
                &req.event_id
            } else {
                &req.response_id
            },
            if req.positive {
                "explicit_positive"
            } else {
                "explicit_negative"
            },
            if req.positive { 1.0 } else { -1.0 },
            1.0,
        );
        if let Err(e) = self.memory.record_feedback(&meta, feedback).await {
            warn!(error = %e, "failed to record feedback event");
        }

        let episode = match self.memory.get_episode(&meta, &req.event_id).await {
            Ok(Some(episode)) => episode,
            Ok(None) => {
                return Ok(tonic::Response::new(ProvideFeedbackResponse {
                    accepted: true,
                    extracted_heuristic_id: String::new(),
                    updated_heuristic_id: String::new(),
                    error_message: "episode_not_found".to_string(),
                }));
            }
            Err(e) => {
                return Ok(tonic::Response::new(ProvideFeedbackResponse {
                    accepted: false,
                    extracted_heuristic_id: String::new(),
                    updated_heuristic_id: String::new(),
                    error_message: e.to_string(),
                }));
            }
        };

        let (extracted, updated, error) = if req.positive {
            self.handle_positive(&meta, &episode).await
        } else {
            let (updated, error) = self.handle_negative(&meta, &episode).await;
            (None, updated, error)
        };

        Ok(tonic::Response::new(ProvideFeedbackResponse {
            accepted: true,
            extracted_heuristic_id: extracted.unwrap_or_default(),
            updated_heuristic_id: updated.unwrap_or_default(),
            error_message: error.unwrap_or_default(),
        }))
    }

    async fn health(
        &self,
        _request: tonic::Request<HealthRequest>,
    ) -> Result<tonic::Response<HealthResponse>, tonic::Status> {
        Ok(tonic::Response::new(HealthResponse {
            status: v1::health_response::Status::Serving as i32,
            message: format!("model: {}", self.chat.model_id()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}
