//! In-process harness wiring the four real services together.
//!
//! The gRPC seams are satisfied by adapters that call the service
//! structs directly, so the full learning loop (routing, persistence,
//! fire auditing, feedback, extraction, cache invalidation) runs in one
//! process with a scripted chat model and a deterministic embedder.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gladys_client::executive::{Deliberation, FeedbackOutcome};
use gladys_client::salience::{HeuristicChange, SalienceEvaluation};
use gladys_client::ClientError;
use gladys_core::event::EpisodicEvent;
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::{Event, Heuristic, RequestMeta, SalienceVector};
use gladys_executive::{ExecutiveConfig, ExecutiveService};
use gladys_memory::{InvalidationSink, MemoryConfig, MemoryService};
use gladys_orchestrator::{
    ComponentRegistry, EventQueue, ExecutiveHandle, GatewayHandle, MemoryHandle,
    OrchestratorConfig, OrchestratorService, OutcomeWatcher, Router, RouterStats, SubscriberSet,
};
use gladys_proto::convert::feedback_source_to_wire;
use gladys_proto::v1::{
    self, executive_server::Executive as _, memory_storage_server::MemoryStorage as _,
    salience_gateway_server::SalienceGateway as _,
};
use gladys_salience::{SalienceConfig, SalienceService};
use gladys_storage::MemoryStorage;
use gladys_test_utils::{InProcessHeuristicSource, ScriptedChat, StaticEmbedder};
use tonic::Request;

pub const EMBED_DIM: usize = 64;

fn rejected(message: String) -> ClientError {
    ClientError::Rejected(message)
}

/// Invalidation sink calling the gateway service directly.
pub struct GatewayNotifier(pub Arc<SalienceService>);

#[async_trait]
impl InvalidationSink for GatewayNotifier {
    async fn notify(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        change: HeuristicChange,
        heuristic: Option<Heuristic>,
    ) -> Result<(), ClientError> {
        let change_type = match change {
            HeuristicChange::Created => v1::HeuristicChangeType::Created,
            HeuristicChange::Updated => v1::HeuristicChangeType::Updated,
            HeuristicChange::Deleted => v1::HeuristicChangeType::Deleted,
        };
        self.0
            .notify_heuristic_change(Request::new(v1::NotifyHeuristicChangeRequest {
                meta: Some(meta.clone().into()),
                heuristic_id: heuristic_id.to_string(),
                change_type: change_type as i32,
                heuristic: heuristic.map(Into::into),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?;
        Ok(())
    }
}

/// Gateway seam over the in-process service.
pub struct GatewayAdapter(pub Arc<SalienceService>);

#[async_trait]
impl GatewayHandle for GatewayAdapter {
    async fn evaluate(&self, event: &Event) -> Result<SalienceEvaluation, ClientError> {
        let response = self
            .0
            .evaluate_salience(Request::new(v1::EvaluateSalienceRequest {
                meta: Some(event.meta.clone().into()),
                event_id: event.id.clone(),
                source: event.source.clone(),
                raw_text: event.raw_text.clone(),
                structured_json: event
                    .structured
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                entity_ids: event.entity_ids.clone(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();

        Ok(SalienceEvaluation {
            salience: response
                .salience
                .map(SalienceVector::from)
                .unwrap_or_default(),
            from_cache: response.from_cache,
            matched_heuristic_id: (!response.matched_heuristic_id.is_empty())
                .then_some(response.matched_heuristic_id),
            matched_action: (!response.matched_action.is_empty())
                .then_some(response.matched_action),
            match_similarity: response.match_similarity,
            error_message: (!response.error_message.is_empty()).then_some(response.error_message),
        })
    }

    async fn health(&self, _meta: &RequestMeta) -> Result<bool, ClientError> {
        Ok(true)
    }
}

/// Executive seam over the in-process service.
pub struct ExecutiveAdapter(pub Arc<ExecutiveService>);

#[async_trait]
impl ExecutiveHandle for ExecutiveAdapter {
    async fn process_event(
        &self,
        event: Event,
        immediate: bool,
    ) -> Result<Deliberation, ClientError> {
        let meta = event.meta.clone();
        let response = self
            .0
            .process_event(Request::new(v1::ProcessEventRequest {
                meta: Some(meta.into()),
                event: Some(event.into()),
                immediate,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        Ok(Deliberation {
            response_id: response.response_id,
            response_text: response.response_text,
            predicted_success: response.predicted_success,
            prediction_confidence: response.prediction_confidence,
            error_message: (!response.error_message.is_empty()).then_some(response.error_message),
        })
    }

    async fn process_moment(
        &self,
        meta: &RequestMeta,
        events: Vec<Event>,
    ) -> Result<Deliberation, ClientError> {
        let response = self
            .0
            .process_moment(Request::new(v1::ProcessMomentRequest {
                meta: Some(meta.clone().into()),
                events: events.into_iter().map(Into::into).collect(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        Ok(Deliberation {
            response_id: response.response_id,
            response_text: response.response_text,
            predicted_success: 0.0,
            prediction_confidence: 0.0,
            error_message: (!response.error_message.is_empty()).then_some(response.error_message),
        })
    }

    async fn provide_feedback(
        &self,
        meta: &RequestMeta,
        event_id: &str,
        positive: bool,
        response_id: Option<&str>,
    ) -> Result<FeedbackOutcome, ClientError> {
        let response = self
            .0
            .provide_feedback(Request::new(v1::ProvideFeedbackRequest {
                meta: Some(meta.clone().into()),
                event_id: event_id.to_string(),
                positive,
                response_id: response_id.unwrap_or_default().to_string(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        Ok(FeedbackOutcome {
            extracted_heuristic_id: (!response.extracted_heuristic_id.is_empty())
                .then_some(response.extracted_heuristic_id),
            updated_heuristic_id: (!response.updated_heuristic_id.is_empty())
                .then_some(response.updated_heuristic_id),
            error_message: (!response.error_message.is_empty()).then_some(response.error_message),
        })
    }

    async fn health(&self, _meta: &RequestMeta) -> Result<bool, ClientError> {
        Ok(true)
    }
}

/// Memory seam over the in-process service.
pub struct MemoryAdapter(pub Arc<MemoryService>);

#[async_trait]
impl MemoryHandle for MemoryAdapter {
    async fn store_episode(
        &self,
        meta: &RequestMeta,
        episode: EpisodicEvent,
    ) -> Result<(), ClientError> {
        let response = self
            .0
            .store_episode(Request::new(v1::StoreEpisodeRequest {
                meta: Some(meta.clone().into()),
                episode: Some(episode.into()),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.error_message.is_empty() {
            Ok(())
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn record_fire(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        event_id: &str,
        episodic_event_id: Option<&str>,
    ) -> Result<String, ClientError> {
        let response = self
            .0
            .record_heuristic_fire(Request::new(v1::RecordHeuristicFireRequest {
                meta: Some(meta.clone().into()),
                heuristic_id: heuristic_id.to_string(),
                event_id: event_id.to_string(),
                episodic_event_id: episodic_event_id.unwrap_or_default().to_string(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.accepted {
            Ok(response.fire_id)
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn resolve_fire(
        &self,
        meta: &RequestMeta,
        fire_id: &str,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<(), ClientError> {
        let response = self
            .0
            .resolve_heuristic_fire(Request::new(v1::ResolveHeuristicFireRequest {
                meta: Some(meta.clone().into()),
                fire_id: fire_id.to_string(),
                outcome: v1::FireOutcome::from(outcome) as i32,
                feedback_source: feedback_source_to_wire(feedback_source) as i32,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.accepted {
            Ok(())
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn update_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<(), ClientError> {
        let response = self
            .0
            .update_heuristic_confidence(Request::new(v1::UpdateHeuristicConfidenceRequest {
                meta: Some(meta.clone().into()),
                heuristic_id: heuristic_id.to_string(),
                positive,
                feedback_source: feedback_source_to_wire(feedback_source) as i32,
                weight,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.error_message.is_empty() {
            Ok(())
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn health(&self, _meta: &RequestMeta) -> Result<bool, ClientError> {
        Ok(true)
    }
}

/// Executive-side memory seam over the in-process Memory Store, so
/// heuristic mutations emit real invalidation notifications.
pub struct ServiceMemoryAccess(pub Arc<MemoryService>);

#[async_trait]
impl gladys_executive::MemoryAccess for ServiceMemoryAccess {
    async fn get_episode(
        &self,
        meta: &RequestMeta,
        event_id: &str,
    ) -> Result<Option<EpisodicEvent>, ClientError> {
        let response = self
            .0
            .get_episode(Request::new(v1::GetEpisodeRequest {
                meta: Some(meta.clone().into()),
                event_id: event_id.to_string(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if !response.error_message.is_empty() {
            return Err(rejected(response.error_message));
        }
        Ok(response.found.then(|| response.episode.map(Into::into)).flatten())
    }

    async fn generate_embedding(
        &self,
        meta: &RequestMeta,
        text: &str,
    ) -> Result<Vec<f32>, ClientError> {
        let response = self
            .0
            .generate_embedding(Request::new(v1::GenerateEmbeddingRequest {
                meta: Some(meta.clone().into()),
                text: text.to_string(),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.error_message.is_empty() {
            Ok(response.embedding)
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn query_matching_heuristics(
        &self,
        meta: &RequestMeta,
        embedding: &[f32],
        source: Option<&str>,
        min_similarity: f64,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<(Heuristic, f64)>, ClientError> {
        let response = self
            .0
            .query_matching_heuristics(Request::new(v1::QueryMatchingHeuristicsRequest {
                meta: Some(meta.clone().into()),
                event_embedding: embedding.to_vec(),
                raw_text: String::new(),
                source: source.unwrap_or_default().to_string(),
                min_similarity,
                min_confidence,
                limit,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if !response.error_message.is_empty() {
            return Err(rejected(response.error_message));
        }
        Ok(response
            .matches
            .into_iter()
            .filter_map(|m| m.heuristic.map(|h| (Heuristic::from(h), m.similarity)))
            .collect())
    }

    async fn store_heuristic(
        &self,
        meta: &RequestMeta,
        heuristic: Heuristic,
        generate_embedding: bool,
    ) -> Result<String, ClientError> {
        let response = self
            .0
            .store_heuristic(Request::new(v1::StoreHeuristicRequest {
                meta: Some(meta.clone().into()),
                heuristic: Some(heuristic.into()),
                generate_embedding,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.accepted {
            Ok(response.heuristic_id)
        } else {
            Err(rejected(response.error_message))
        }
    }

    async fn update_heuristic_confidence(
        &self,
        meta: &RequestMeta,
        heuristic_id: &str,
        positive: bool,
        feedback_source: Option<FeedbackSource>,
        weight: f64,
    ) -> Result<gladys_client::memory::ConfidenceUpdate, ClientError> {
        let response = self
            .0
            .update_heuristic_confidence(Request::new(v1::UpdateHeuristicConfidenceRequest {
                meta: Some(meta.clone().into()),
                heuristic_id: heuristic_id.to_string(),
                positive,
                feedback_source: feedback_source_to_wire(feedback_source) as i32,
                weight,
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if !response.error_message.is_empty() {
            return Err(rejected(response.error_message));
        }
        Ok(gladys_client::memory::ConfidenceUpdate {
            alpha: response.alpha,
            beta: response.beta,
            confidence: response.confidence,
        })
    }

    async fn record_feedback(
        &self,
        meta: &RequestMeta,
        feedback: gladys_core::feedback::FeedbackEvent,
    ) -> Result<String, ClientError> {
        let response = self
            .0
            .record_feedback_event(Request::new(v1::RecordFeedbackEventRequest {
                meta: Some(meta.clone().into()),
                feedback: Some(feedback.into()),
            }))
            .await
            .map_err(|status| rejected(status.to_string()))?
            .into_inner();
        if response.accepted {
            Ok(response.feedback_id)
        } else {
            Err(rejected(response.error_message))
        }
    }
}

/// The assembled in-process stack.
pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub embedder: Arc<StaticEmbedder>,
    pub memory_service: Arc<MemoryService>,
    pub salience_service: Arc<SalienceService>,
    pub executive_service: Arc<ExecutiveService>,
    pub queue: Arc<EventQueue>,
    pub watcher: Arc<OutcomeWatcher>,
    pub subscribers: Arc<SubscriberSet>,
    pub stats: Arc<RouterStats>,
    pub router: Arc<Router>,
    pub orchestrator: OrchestratorService,
    pub chat: Arc<ScriptedChat>,
}

impl Harness {
    /// Build the stack with the given scripted chat replies.
    pub fn new(chat_replies: Vec<String>) -> Self {
        Self::with_config(chat_replies, OrchestratorConfig::default())
    }

    pub fn with_config(chat_replies: Vec<String>, config: OrchestratorConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let embedder = Arc::new(StaticEmbedder::with_dimension(EMBED_DIM));

        let salience_service = Arc::new(SalienceService::new(
            Arc::new(InProcessHeuristicSource::new(
                Arc::clone(&storage),
                Arc::clone(&embedder),
            )),
            SalienceConfig::default(),
        ));

        let memory_service = Arc::new(MemoryService::new(
            Arc::clone(&storage) as Arc<dyn gladys_storage::StorageBackend>,
            Arc::clone(&embedder) as Arc<dyn gladys_core::Embedder>,
            Some(Arc::new(GatewayNotifier(Arc::clone(&salience_service)))
                as Arc<dyn InvalidationSink>),
            MemoryConfig {
                embedding_dim: EMBED_DIM,
            },
        ));

        let chat = Arc::new(ScriptedChat::with_replies(chat_replies));
        let executive_service = Arc::new(ExecutiveService::new(
            Arc::clone(&chat) as Arc<dyn gladys_executive::ChatModel>,
            Arc::new(ServiceMemoryAccess(Arc::clone(&memory_service))),
            ExecutiveConfig::default(),
        ));

        let registry = Arc::new(ComponentRegistry::new(config.heartbeat_dead_after));
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let subscribers = Arc::new(SubscriberSet::new(config.subscriber_buffer));
        let watcher = Arc::new(OutcomeWatcher::new(config.outcome_deadline));
        let stats = Arc::new(RouterStats::default());

        let gateway: Arc<dyn GatewayHandle> =
            Arc::new(GatewayAdapter(Arc::clone(&salience_service)));
        let executive: Arc<dyn ExecutiveHandle> =
            Arc::new(ExecutiveAdapter(Arc::clone(&executive_service)));
        let memory: Arc<dyn MemoryHandle> = Arc::new(MemoryAdapter(Arc::clone(&memory_service)));

        let router = Arc::new(Router::new(
            Arc::clone(&queue),
            Arc::clone(&gateway),
            Arc::clone(&executive),
            Arc::clone(&memory),
            Arc::clone(&subscribers),
            Arc::clone(&watcher),
            Arc::clone(&stats),
            config.clone(),
        ));

        let orchestrator = OrchestratorService::new(
            registry,
            Arc::clone(&queue),
            Arc::clone(&subscribers),
            Arc::clone(&watcher),
            gateway,
            executive,
            memory,
            Arc::clone(&stats),
            config,
        );

        Self {
            storage,
            embedder,
            memory_service,
            salience_service,
            executive_service,
            queue,
            watcher,
            subscribers,
            stats,
            router,
            orchestrator,
            chat,
        }
    }

    /// Publish one event through the orchestrator's public surface.
    pub async fn publish(&self, event: Event) -> v1::PublishEventResponse {
        use gladys_proto::v1::orchestrator_server::Orchestrator as _;
        self.orchestrator
            .publish_event(Request::new(v1::PublishEventRequest {
                meta: Some(event.meta.clone().into()),
                event: Some(event.into()),
            }))
            .await
            .unwrap()
            .into_inner()
    }

    /// Run the routing worker until the queue is empty, then let
    /// background notifies settle.
    pub async fn drain(&self) {
        while let Some(queued) = self.queue.try_pop().await {
            self.router.process(queued).await;
        }
        settle().await;
    }

    /// Provide feedback through the orchestrator's public surface.
    pub async fn feedback(&self, event_id: &str, positive: bool) -> v1::OrchestratorFeedbackResponse {
        use gladys_proto::v1::orchestrator_server::Orchestrator as _;
        let response = self
            .orchestrator
            .provide_feedback(Request::new(v1::OrchestratorFeedbackRequest {
                meta: None,
                event_id: event_id.to_string(),
                positive,
                response_id: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        settle().await;
        response
    }

    /// Seed a heuristic through the Memory Store (embedding generated,
    /// gateway notified). Returns its id.
    pub async fn seed_heuristic(&self, heuristic: Heuristic) -> String {
        let response = self
            .memory_service
            .store_heuristic(Request::new(v1::StoreHeuristicRequest {
                meta: None,
                heuristic: Some(heuristic.into()),
                generate_embedding: true,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.accepted, "{}", response.error_message);
        settle().await;
        response.heuristic_id
    }
}

/// Let spawned background tasks (notifies, fire resolutions) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// A plain sensor event.
pub fn event(id: &str, source: &str, text: &str) -> Event {
    let mut e = Event::new(source, text);
    e.id = id.to_string();
    e
}
