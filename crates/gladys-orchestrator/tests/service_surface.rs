//! Orchestrator service-surface behavior over the in-process stack.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use gladys_core::SalienceVector;
use gladys_proto::v1::{self, orchestrator_server::Orchestrator as _};
use gladys_storage::StorageBackend;
use support::{event, Harness};
use tokio_stream::StreamExt;
use tonic::Request;

#[tokio::test]
async fn full_queue_rejects_with_queue_full() {
    let config = gladys_orchestrator::OrchestratorConfig {
        queue_capacity: 2,
        ..Default::default()
    };
    let harness = Harness::with_config(vec![], config);

    assert!(harness.publish(event("e-1", "gmail", "one")).await.accepted);
    assert!(harness.publish(event("e-2", "gmail", "two")).await.accepted);

    let rejected = harness.publish(event("e-3", "gmail", "three")).await;
    assert!(!rejected.accepted);
    assert_eq!(rejected.error_message, "queue_full");

    // Heartbeats are never rejected for queue reasons.
    let id = {
        let response = harness
            .orchestrator
            .register_component(Request::new(v1::RegisterComponentRequest {
                meta: None,
                component_id: String::new(),
                component_type: "sensor".to_string(),
                address: "http://localhost:7001".to_string(),
                capabilities: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.accepted);
        response.component_id
    };
    let heartbeat = harness
        .orchestrator
        .heartbeat(Request::new(v1::HeartbeatRequest {
            meta: None,
            component_id: id,
            state: v1::ComponentState::Active as i32,
            error_message: String::new(),
            metrics: Default::default(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(heartbeat.acknowledged);
}

#[tokio::test]
async fn command_args_arrive_verbatim_on_exactly_one_heartbeat() {
    let harness = Harness::new(vec![]);

    let registered = harness
        .orchestrator
        .register_component(Request::new(v1::RegisterComponentRequest {
            meta: None,
            component_id: "sensor-7".to_string(),
            component_type: "sensor".to_string(),
            address: "http://localhost:7001".to_string(),
            capabilities: Some(v1::ComponentCapabilities {
                transport_mode: v1::TransportMode::Streaming as i32,
                supported_commands: vec![v1::ComponentCommand::Recover as i32],
                instance_policy: "single".to_string(),
            }),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(registered.component_id, "sensor-7");

    let args: std::collections::HashMap<String, String> = [
        ("dry_run".to_string(), "true".to_string()),
        ("force".to_string(), "false".to_string()),
        ("timeout_ms".to_string(), "2500".to_string()),
        ("strategy".to_string(), "fast-restart".to_string()),
    ]
    .into_iter()
    .collect();

    let sent = harness
        .orchestrator
        .send_command(Request::new(v1::SendCommandRequest {
            meta: None,
            target_id: "sensor-7".to_string(),
            command: v1::ComponentCommand::Recover as i32,
            args: args.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(sent.queued);

    let heartbeat = harness
        .orchestrator
        .heartbeat(Request::new(v1::HeartbeatRequest {
            meta: None,
            component_id: "sensor-7".to_string(),
            state: v1::ComponentState::Active as i32,
            error_message: String::new(),
            metrics: Default::default(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(heartbeat.commands.len(), 1);
    let delivered = &heartbeat.commands[0];
    assert_eq!(delivered.command_id, sent.command_id);
    assert_eq!(delivered.command, v1::ComponentCommand::Recover as i32);
    assert_eq!(delivered.args, args);

    // Exactly one delivery.
    let second = harness
        .orchestrator
        .heartbeat(Request::new(v1::HeartbeatRequest {
            meta: None,
            component_id: "sensor-7".to_string(),
            state: v1::ComponentState::Active as i32,
            error_message: String::new(),
            metrics: Default::default(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(second.commands.is_empty());
}

#[tokio::test]
async fn subscribers_see_processed_events_with_routing_metadata() {
    let harness = Harness::new(vec![]);

    let mut stream = harness
        .orchestrator
        .subscribe(Request::new(v1::SubscribeRequest {
            meta: None,
            subscriber_id: "dashboard".to_string(),
            source_filters: vec!["minecraft".to_string()],
            event_types: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner();

    harness
        .publish(event("e-1", "minecraft", "creeper hissing nearby"))
        .await;
    harness.publish(event("e-2", "gmail", "newsletter")).await;
    harness.drain().await;

    let delivered = stream.next().await.unwrap().unwrap();
    assert_eq!(delivered.event.as_ref().unwrap().id, "e-1");
    assert_eq!(delivered.decision_path, "batch");
    assert!(delivered.salience.is_some());
}

#[tokio::test]
async fn duplicate_event_ids_persist_once_and_ack_identically() {
    let harness = Harness::new(vec![]);

    let first = harness.publish(event("e-dup", "gmail", "same event")).await;
    harness.drain().await;
    let second = harness.publish(event("e-dup", "gmail", "same event")).await;
    harness.drain().await;

    assert!(first.accepted && second.accepted);
    assert_eq!(first.error_message, second.error_message);
    let hits = harness
        .storage
        .query_episodes_by_time(0, 0, Some("gmail"), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn system_metrics_events_bypass_persistence() {
    let harness = Harness::new(vec![]);
    harness
        .publish(event("m-1", "system.metrics", "queue_depth=3"))
        .await;
    harness.drain().await;

    assert!(harness.storage.get_episode("m-1").await.unwrap().is_none());
}

#[tokio::test]
async fn pre_scored_events_route_by_their_own_priority() {
    let harness = Harness::new(vec![]);

    let mut low = event("e-low", "lab", "background hum");
    let mut low_score = SalienceVector::zero("sensor");
    low_score.set_dimension("novelty", 0.1);
    low_score.recompute_aggregate();
    low.salience = Some(low_score);

    let mut high = event("e-high", "lab", "pressure spike");
    let mut high_score = SalienceVector::zero("sensor");
    high_score.set_dimension("actionability", 0.95);
    high_score.recompute_aggregate();
    high.salience = Some(high_score);

    harness.publish(low).await;
    harness.publish(high).await;

    // The worker pops the high-salience event first.
    let first = harness.queue.try_pop().await.unwrap();
    assert_eq!(first.event.id, "e-high");
    let second = harness.queue.try_pop().await.unwrap();
    assert_eq!(second.event.id, "e-low");
}

#[tokio::test]
async fn system_status_reflects_activity() {
    let harness = Harness::new(vec![]);
    harness.publish(event("e-1", "gmail", "mail one")).await;
    harness.drain().await;

    let status = harness
        .orchestrator
        .system_status(Request::new(v1::SystemStatusRequest { meta: None }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.events_accepted, 1);
    assert_eq!(status.events_processed, 1);
    assert_eq!(status.queue_depth, 0);
    assert!(status.queue_capacity >= 1);
}

#[tokio::test]
async fn gateway_outage_falls_back_to_default_salience() {
    use async_trait::async_trait;
    use gladys_client::ClientError;
    use gladys_core::{Event, RequestMeta};
    use gladys_orchestrator::GatewayHandle;
    use std::sync::Arc;

    struct DownGateway;

    #[async_trait]
    impl GatewayHandle for DownGateway {
        async fn evaluate(
            &self,
            _event: &Event,
        ) -> Result<gladys_client::salience::SalienceEvaluation, ClientError> {
            Err(ClientError::from(tonic::Status::unavailable("down")))
        }

        async fn health(&self, _meta: &RequestMeta) -> Result<bool, ClientError> {
            Ok(false)
        }
    }

    // Rebuild a router with the dead gateway but the live rest.
    let harness = Harness::new(vec![]);
    let router = std::sync::Arc::new(gladys_orchestrator::Router::new(
        Arc::clone(&harness.queue),
        Arc::new(DownGateway),
        Arc::new(support::ExecutiveAdapter(Arc::clone(&harness.executive_service))),
        Arc::new(support::MemoryAdapter(Arc::clone(&harness.memory_service))),
        Arc::clone(&harness.subscribers),
        Arc::clone(&harness.watcher),
        Arc::clone(&harness.stats),
        gladys_orchestrator::OrchestratorConfig::default(),
    ));

    harness.publish(event("e-1", "minecraft", "anything at all")).await;
    while let Some(queued) = harness.queue.try_pop().await {
        router.process(queued).await;
    }
    support::settle().await;

    // The event was persisted with the fallback vector, not dropped.
    let episode = harness.storage.get_episode("e-1").await.unwrap().unwrap();
    let salience = episode.salience.unwrap();
    assert_eq!(salience.dimension("novelty"), 0.5);
    assert_eq!(episode.decision_path.as_deref(), Some("batch"));
}
