//! gRPC service implementation for the Orchestrator.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use gladys_core::component::ComponentState;
use gladys_core::fire::{FeedbackSource, FireOutcome};
use gladys_core::task::spawn_logged;
use gladys_core::{Event, RequestMeta};
use gladys_proto::convert::command_from_wire;
use gladys_proto::v1::{
    self, orchestrator_server::Orchestrator as OrchestratorGrpc, HealthDetailsRequest,
    HealthDetailsResponse, HealthRequest, HealthResponse, HeartbeatRequest, HeartbeatResponse,
    OrchestratorFeedbackRequest, OrchestratorFeedbackResponse, PublishEventRequest,
    PublishEventResponse, RegisterComponentRequest, RegisterComponentResponse,
    ResolveComponentRequest, ResolveComponentResponse, SendCommandRequest, SendCommandResponse,
    SubscribeRequest, SubscribedEvent, SystemStatusRequest, SystemStatusResponse,
    UnregisterComponentRequest, UnregisterComponentResponse,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients::{ExecutiveHandle, GatewayHandle, MemoryHandle};
use crate::queue::EventQueue;
use crate::registry::ComponentRegistry;
use crate::router::RouterStats;
use crate::subscribers::SubscriberSet;
use crate::watcher::OutcomeWatcher;
use crate::OrchestratorConfig;

/// The Orchestrator service.
pub struct OrchestratorService {
    registry: Arc<ComponentRegistry>,
    queue: Arc<EventQueue>,
    subscribers: Arc<SubscriberSet>,
    watcher: Arc<OutcomeWatcher>,
    gateway: Arc<dyn GatewayHandle>,
    executive: Arc<dyn ExecutiveHandle>,
    memory: Arc<dyn MemoryHandle>,
    stats: Arc<RouterStats>,
    config: OrchestratorConfig,
    started_at_ms: i64,
}

impl OrchestratorService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ComponentRegistry>,
        queue: Arc<EventQueue>,
        subscribers: Arc<SubscriberSet>,
        watcher: Arc<OutcomeWatcher>,
        gateway: Arc<dyn GatewayHandle>,
        executive: Arc<dyn ExecutiveHandle>,
        memory: Arc<dyn MemoryHandle>,
        stats: Arc<RouterStats>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            subscribers,
            watcher,
            gateway,
            executive,
            memory,
            stats,
            config,
            started_at_ms: gladys_core::now_ms(),
        }
    }

    /// Admit one event to the priority queue and ack it. The ack happens
    /// at admission; routing runs later on the worker.
    async fn admit(
        queue: &EventQueue,
        stats: &RouterStats,
        config: &OrchestratorConfig,
        wire: Option<v1::Event>,
    ) -> PublishEventResponse {
        let Some(wire) = wire else {
            return PublishEventResponse {
                event_id: String::new(),
                accepted: false,
                error_message: "missing event".to_string(),
            };
        };
        let mut event: Event = wire.into();
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        if event.timestamp_ms == 0 {
            event.timestamp_ms = gladys_core::now_ms();
        }
        let event_id = event.id.clone();

        // Pre-scored events queue on their own salience; unscored ones
        // take the default priority and get scored by the worker.
        let (priority, threat) = match &event.salience {
            Some(s) => (s.salience, s.is_threat()),
            None => (config.default_priority, false),
        };

        match queue.push(event, priority, threat).await {
            Ok(()) => {
                stats.events_accepted.fetch_add(1, Ordering::Relaxed);
                PublishEventResponse {
                    event_id,
                    accepted: true,
                    error_message: String::new(),
                }
            }
            Err(e) => {
                stats.events_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event_id, "queue full; event rejected");
                PublishEventResponse {
                    event_id,
                    accepted: false,
                    error_message: e.to_string(),
                }
            }
        }
    }
}

#[tonic::async_trait]
impl OrchestratorGrpc for OrchestratorService {
    async fn publish_event(
        &self,
        request: Request<PublishEventRequest>,
    ) -> Result<Response<PublishEventResponse>, Status> {
        let req = request.into_inner();
        let ack = Self::admit(&self.queue, &self.stats, &self.config, req.event).await;
        Ok(Response::new(ack))
    }

    type PublishEventsStream = ReceiverStream<Result<PublishEventResponse, Status>>;

    async fn publish_events(
        &self,
        request: Request<Streaming<PublishEventRequest>>,
    ) -> Result<Response<Self::PublishEventsStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let config = self.config.clone();

        tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                match message {
                    Ok(req) => {
                        let ack = Self::admit(&queue, &stats, &config, req.event).await;
                        if tx.send(Ok(ack)).await.is_err() {
                            break; // ack stream closed by the sensor
                        }
                    }
                    Err(status) => {
                        debug!(error = %status, "publish stream ended with error");
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type SubscribeStream = ReceiverStream<Result<SubscribedEvent, Status>>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        let subscriber_id = if req.subscriber_id.is_empty() {
            format!("subscriber-{}", Uuid::new_v4())
        } else {
            req.subscriber_id
        };
        let stream = self
            .subscribers
            .subscribe(&subscriber_id, req.source_filters, req.event_types)
            .await;
        Ok(Response::new(stream))
    }

    async fn register_component(
        &self,
        request: Request<RegisterComponentRequest>,
    ) -> Result<Response<RegisterComponentResponse>, Status> {
        let req = request.into_inner();
        if req.component_type.is_empty() {
            return Ok(Response::new(RegisterComponentResponse {
                accepted: false,
                component_id: String::new(),
                error_message: "component_type is required".to_string(),
            }));
        }
        let component_id = self
            .registry
            .register(
                Some(req.component_id),
                &req.component_type,
                &req.address,
                req.capabilities.map(Into::into).unwrap_or_default(),
            )
            .await;
        Ok(Response::new(RegisterComponentResponse {
            accepted: true,
            component_id,
            error_message: String::new(),
        }))
    }

    async fn unregister_component(
        &self,
        request: Request<UnregisterComponentRequest>,
    ) -> Result<Response<UnregisterComponentResponse>, Status> {
        let req = request.into_inner();
        let existed = self.registry.unregister(&req.component_id).await;
        Ok(Response::new(UnregisterComponentResponse {
            accepted: existed,
            error_message: if existed {
                String::new()
            } else {
                format!("component '{}' not registered", req.component_id)
            },
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let state: ComponentState = req.state().into();
        let error_message = if req.error_message.is_empty() {
            None
        } else {
            Some(req.error_message)
        };

        match self
            .registry
            .heartbeat(&req.component_id, state, error_message)
            .await
        {
            Some(pending) => Ok(Response::new(HeartbeatResponse {
                acknowledged: true,
                commands: pending.into_iter().map(Into::into).collect(),
            })),
            None => Ok(Response::new(HeartbeatResponse {
                acknowledged: false,
                commands: Vec::new(),
            })),
        }
    }

    async fn send_command(
        &self,
        request: Request<SendCommandRequest>,
    ) -> Result<Response<SendCommandResponse>, Status> {
        let req = request.into_inner();
        let Some(command) = command_from_wire(req.command()) else {
            return Ok(Response::new(SendCommandResponse {
                queued: false,
                command_id: String::new(),
                error_message: "command must be specified".to_string(),
            }));
        };
        let args = req.args.into_iter().collect();
        match self.registry.queue_command(&req.target_id, command, args).await {
            Some(command_id) => Ok(Response::new(SendCommandResponse {
                queued: true,
                command_id,
                error_message: String::new(),
            })),
            None => Ok(Response::new(SendCommandResponse {
                queued: false,
                command_id: String::new(),
                error_message: format!("component '{}' not registered", req.target_id),
            })),
        }
    }

    async fn resolve_component(
        &self,
        request: Request<ResolveComponentRequest>,
    ) -> Result<Response<ResolveComponentResponse>, Status> {
        let req = request.into_inner();
        let component_id = (!req.component_id.is_empty()).then_some(req.component_id.as_str());
        let component_type =
            (!req.component_type.is_empty()).then_some(req.component_type.as_str());
        let records = self.registry.resolve(component_id, component_type).await;
        Ok(Response::new(ResolveComponentResponse {
            error_message: if records.is_empty() {
                "no matching component".to_string()
            } else {
                String::new()
            },
            components: records
                .into_iter()
                .map(|record| v1::ResolvedComponent {
                    component_id: record.component_id,
                    component_type: record.component_type,
                    address: record.address,
                    state: v1::ComponentState::from(record.state) as i32,
                    capabilities: Some(record.capabilities.into()),
                    last_heartbeat_ms: record.last_heartbeat_ms,
                })
                .collect(),
        }))
    }

    async fn provide_feedback(
        &self,
        request: Request<OrchestratorFeedbackRequest>,
    ) -> Result<Response<OrchestratorFeedbackResponse>, Status> {
        let req = request.into_inner();
        let meta: RequestMeta = req.meta.map(Into::into).unwrap_or_default();
        let response_id = (!req.response_id.is_empty()).then_some(req.response_id.as_str());

        // Explicit feedback resolves any fires still waiting on this
        // event; confidence updates flow through the executive.
        for fire in self.watcher.take_for_event(&req.event_id).await {
            let memory = Arc::clone(&self.memory);
            let meta = meta.child("orchestrator");
            let positive = req.positive;
            spawn_logged("resolve_explicit_fire", async move {
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
                        Some(FeedbackSource::Explicit),
                    )
                    .await
            });
        }

        match self
            .executive
            .provide_feedback(&meta, &req.event_id, req.positive, response_id)
            .await
        {
            Ok(outcome) => Ok(Response::new(OrchestratorFeedbackResponse {
                accepted: true,
                error_message: outcome.error_message.unwrap_or_default(),
            })),
            Err(e) => {
                warn!(event_id = %req.event_id, error = %e, "feedback forwarding failed");
                Ok(Response::new(OrchestratorFeedbackResponse {
                    accepted: false,
                    error_message: e.to_string(),
                }))
            }
        }
    }

    async fn system_status(
        &self,
        _request: Request<SystemStatusRequest>,
    ) -> Result<Response<SystemStatusResponse>, Status> {
        Ok(Response::new(SystemStatusResponse {
            queue_depth: self.queue.len().await as u64,
            queue_capacity: self.queue.capacity() as u64,
            events_accepted: self.stats.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.stats.events_rejected.load(Ordering::Relaxed),
            events_processed: self.stats.events_processed.load(Ordering::Relaxed),
            fast_path_hits: self.stats.fast_path_hits.load(Ordering::Relaxed),
            slow_path_dispatches: self.stats.slow_path_dispatches.load(Ordering::Relaxed),
            registered_components: self.registry.count().await as u32,
            live_subscribers: self.subscribers.count().await as u32,
            uptime_ms: (gladys_core::now_ms() - self.started_at_ms).max(0) as u64,
        }))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(HealthResponse {
            status: v1::health_response::Status::Serving as i32,
            message: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    async fn health_details(
        &self,
        _request: Request<HealthDetailsRequest>,
    ) -> Result<Response<HealthDetailsResponse>, Status> {
        let meta = RequestMeta::internal("orchestrator");
        let mut dependencies = Vec::with_capacity(3);

        let gateway = self.gateway.health(&meta).await;
        dependencies.push(dependency_health("salience-gateway", gateway));
        let executive = self.executive.health(&meta).await;
        dependencies.push(dependency_health("executive", executive));
        let memory = self.memory.health(&meta).await;
        dependencies.push(dependency_health("memory-store", memory));

        Ok(Response::new(HealthDetailsResponse {
            self_: Some(HealthResponse {
                status: v1::health_response::Status::Serving as i32,
                message: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            dependencies,
        }))
    }
}

fn dependency_health(
    name: &str,
    result: Result<bool, gladys_client::ClientError>,
) -> v1::DependencyHealth {
    match result {
        Ok(healthy) => v1::DependencyHealth {
            name: name.to_string(),
            healthy,
            message: String::new(),
        },
        Err(e) => v1::DependencyHealth {
            name: name.to_string(),
            healthy: false,
            message: e.to_string(),
        },
    }
}
