//! GLADyS Executive server.
//!
//! # Environment Variables
//!
//! - `EXECUTIVE_PORT`: gRPC listen port (default: 50053)
//! - `MEMORY_ADDRESS`: Memory Store endpoint (default: http://localhost:50051)
//! - `OLLAMA_BASE_URL`: chat backend (default: http://localhost:11434)
//! - `LLM_MODEL`: chat model name (default: llama3)
//! - `EXTRACTION_PRIOR_ALPHA` / `EXTRACTION_PRIOR_BETA`: prior
//!   pseudo-counts for extracted heuristics (defaults: 1.0 / 1.0)
//! - `RUST_LOG`: log filter (default: gladys_executive=info)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use gladys_client::{ClientConfig, MemoryClient};
use gladys_core::env::{
    env_string_or_default, env_u16_or_default, EXECUTIVE_PORT, LLM_MODEL, MEMORY_ADDRESS,
    OLLAMA_BASE_URL,
};
use gladys_executive::{ExecutiveConfig, ExecutiveService, OllamaChat};
use gladys_proto::v1::executive_server::ExecutiveServer;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gladys_executive=info"));
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

    let port = env_u16_or_default(EXECUTIVE_PORT, 50053);
    let memory_address = env_string_or_default(MEMORY_ADDRESS, "http://localhost:50051");
    let ollama_base_url = env_string_or_default(OLLAMA_BASE_URL, "http://localhost:11434");
    let llm_model = env_string_or_default(LLM_MODEL, "llama3");
    let config = ExecutiveConfig::from_env();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "GLADyS Executive starting"
    );

    let memory = match MemoryClient::new(ClientConfig::new(memory_address.clone())) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, address = %memory_address, "invalid MEMORY_ADDRESS");
            return ExitCode::FAILURE;
        }
    };

    let chat = Arc::new(
        OllamaChat::new(ollama_base_url.clone())
            .with_model(llm_model.clone())
            .with_temperature(0.7),
    );

    let service = ExecutiveService::new(chat, memory, config);

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
        llm = %llm_model,
        backend = %ollama_base_url,
        "Executive serving"
    );

    if let Err(e) = Server::builder()
        .add_service(ExecutiveServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    info!("Executive shutdown complete");
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
