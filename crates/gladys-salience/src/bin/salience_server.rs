//! GLADyS Salience Gateway server.
//!
//! # Environment Variables
//!
//! - `SALIENCE_PORT`: gRPC listen port (default: 50052)
//! - `MEMORY_ADDRESS`: Memory Store endpoint (default: http://localhost:50051)
//! - `CACHE_MAX_HEURISTICS`: heuristic cache capacity (default: 50)
//! - `CACHE_HEURISTIC_TTL_MS`: cache TTL, 0 disables (default: 0)
//! - `CACHE_NOVELTY_THRESHOLD`: habituation similarity floor (default: 0.85)
//! - `CACHE_EVENT_MEMORY_SIZE`: novelty FIFO size (default: 100)
//! - `SALIENCE_MIN_HEURISTIC_SIMILARITY`: global match floor (default: 0.6)
//! - `SALIENCE_MIN_HEURISTIC_CONFIDENCE`: confidence floor (default: 0.5)
//! - `SALIENCE_FALLBACK_NOVELTY`: default-vector novelty (default: 0.5)
//! - `RUST_LOG`: log filter (default: gladys_salience=info)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use gladys_client::{ClientConfig, MemoryClient};
use gladys_core::env::{env_string_or_default, env_u16_or_default, MEMORY_ADDRESS, SALIENCE_PORT};
use gladys_proto::v1::salience_gateway_server::SalienceGatewayServer;
use gladys_salience::{SalienceConfig, SalienceService};
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gladys_salience=info"));
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

    let port = env_u16_or_default(SALIENCE_PORT, 50052);
    let memory_address = env_string_or_default(MEMORY_ADDRESS, "http://localhost:50051");
    let config = SalienceConfig::from_env();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "GLADyS Salience Gateway starting"
    );

    // Embedding and storage queries ride the fast path; keep the memory
    // deadline well under the 500ms salience budget.
    let memory = match MemoryClient::new(
        ClientConfig::new(memory_address.clone())
            .with_request_timeout(Duration::from_millis(400)),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, address = %memory_address, "invalid MEMORY_ADDRESS");
            return ExitCode::FAILURE;
        }
    };

    let service = SalienceService::new(memory, config.clone());

    let addr: SocketAddr = match format!("0.0.0.0:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(port, error = %e, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    info!(
        %addr,
        memory = %memory_address,
        cache_capacity = config.cache_capacity,
        min_similarity = config.min_similarity,
        min_confidence = config.min_confidence,
        "Salience Gateway serving"
    );

    if let Err(e) = Server::builder()
        .add_service(SalienceGatewayServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    info!("Salience Gateway shutdown complete");
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
