//! GLADyS Orchestrator server.
//!
//! # Environment Variables
//!
//! - `ORCHESTRATOR_PORT`: gRPC listen port (default: 50050)
//! - `SALIENCE_ADDRESS`: Salience Gateway endpoint (default: http://localhost:50052)
//! - `EXECUTIVE_ADDRESS`: Executive endpoint (default: http://localhost:50053)
//! - `MEMORY_ADDRESS`: Memory Store endpoint (default: http://localhost:50051)
//! - `QUEUE_CAPACITY`: priority queue capacity (default: 1024)
//! - `SALIENCE_HIGH_THRESHOLD`: slow-path threshold (default: 0.7)
//! - `SALIENCE_FALLBACK_NOVELTY`: fallback-vector novelty (default: 0.5)
//! - `OUTCOME_DEADLINE_MS`: fire feedback deadline (default: 60000)
//! - `HEARTBEAT_DEAD_AFTER_MS`: dead-detection window (default: 30000)
//! - `MOMENT_FLUSH_MS`: batch drain interval (default: 30000)
//! - `RUST_LOG`: log filter (default: gladys_orchestrator=info)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use gladys_client::{ClientConfig, ExecutiveClient, MemoryClient, SalienceClient};
use gladys_core::env::{
    env_string_or_default, env_u16_or_default, EXECUTIVE_ADDRESS, MEMORY_ADDRESS,
    ORCHESTRATOR_PORT, SALIENCE_ADDRESS,
};
use gladys_orchestrator::{
    ComponentRegistry, EventQueue, OrchestratorConfig, OrchestratorService, OutcomeWatcher,
    Router, RouterStats, SubscriberSet,
};
use gladys_proto::v1::orchestrator_server::OrchestratorServer;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gladys_orchestrator=info"));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {err}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let port = env_u16_or_default(ORCHESTRATOR_PORT, 50050);
    let salience_address = env_string_or_default(SALIENCE_ADDRESS, "http://localhost:50052");
    let executive_address = env_string_or_default(EXECUTIVE_ADDRESS, "http://localhost:50053");
    let memory_address = env_string_or_default(MEMORY_ADDRESS, "http://localhost:50051");
    let config = OrchestratorConfig::from_env();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "GLADyS Orchestrator starting"
    );

    // Per-RPC budgets: salience 500ms, slow path 10s, persistence 5s.
    let gateway = match SalienceClient::new(
        ClientConfig::new(salience_address.clone())
            .with_request_timeout(Duration::from_millis(500)),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, address = %salience_address, "invalid SALIENCE_ADDRESS");
            return ExitCode::FAILURE;
        }
    };
    let executive = match ExecutiveClient::new(
        ClientConfig::new(executive_address.clone()).with_request_timeout(Duration::from_secs(10)),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, address = %executive_address, "invalid EXECUTIVE_ADDRESS");
            return ExitCode::FAILURE;
        }
    };
    let memory = match MemoryClient::new(ClientConfig::new(memory_address.clone())) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, address = %memory_address, "invalid MEMORY_ADDRESS");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(ComponentRegistry::new(config.heartbeat_dead_after));
    let queue = Arc::new(EventQueue::new(config.queue_capacity));
    let subscribers = Arc::new(SubscriberSet::new(config.subscriber_buffer));
    let watcher = Arc::new(OutcomeWatcher::new(config.outcome_deadline));
    let stats = Arc::new(RouterStats::default());

    let router = Arc::new(Router::new(
        Arc::clone(&queue),
        gateway.clone(),
        executive.clone(),
        memory.clone(),
        Arc::clone(&subscribers),
        Arc::clone(&watcher),
        Arc::clone(&stats),
        config.clone(),
    ));

    // Background tasks: routing worker, batch drains, outcome expiry,
    // heartbeat scanning. All die with the process.
    tokio::spawn(Arc::clone(&router).run());
    tokio::spawn(Arc::clone(&router).run_moment_flusher());
    tokio::spawn(Arc::clone(&router).run_outcome_expirer());
    {
        let registry = Arc::clone(&registry);
        let scan_every = (config.heartbeat_dead_after / 3).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                registry.mark_dead().await;
            }
        });
    }

    let service = OrchestratorService::new(
        registry,
        queue,
        subscribers,
        watcher,
        gateway,
        executive,
        memory,
        stats,
        config.clone(),
    );

    let addr: SocketAddr = match format!("0.0.0.0:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(port, error = %e, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    info!(
        %addr,
        salience = %salience_address,
        executive = %executive_address,
        memory = %memory_address,
        queue_capacity = config.queue_capacity,
        high_threshold = config.high_threshold,
        "Orchestrator serving"
    );

    if let Err(e) = Server::builder()
        .add_service(OrchestratorServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    info!("Orchestrator shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
