//! GLADyS Memory Store server.
//!
//! # Environment Variables
//!
//! - `MEMORY_PORT`: gRPC listen port (default: 50051)
//! - `DATABASE_URL`: PostgreSQL connection string (optional; in-memory
//!   storage when unset; data does not survive restarts)
//! - `SALIENCE_ADDRESS`: Salience Gateway endpoint for invalidation
//!   notifications (default: http://localhost:50052)
//! - `OLLAMA_BASE_URL`: embedding backend (default: http://localhost:11434)
//! - `EMBEDDING_MODEL`: embedding model name (default: all-minilm)
//! - `EMBEDDING_DIM`: embedding dimensionality (default: 384)
//! - `RUST_LOG`: log filter (default: gladys_memory=info)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use gladys_client::{ClientConfig, SalienceClient};
use gladys_core::env::{
    env_string, env_string_or_default, env_u16_or_default, env_usize_or_default, DATABASE_URL,
    EMBEDDING_DIM, EMBEDDING_MODEL, MEMORY_PORT, OLLAMA_BASE_URL, SALIENCE_ADDRESS,
};
use gladys_memory::{MemoryConfig, MemoryService, OllamaEmbedder};
use gladys_proto::v1::memory_storage_server::MemoryStorageServer;
use gladys_storage::{MemoryStorage, PostgresStorage, StorageBackend};
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct EnvConfig {
    port: u16,
    database_url: Option<String>,
    salience_address: String,
    ollama_base_url: String,
    embedding_model: String,
    embedding_dim: usize,
}

impl EnvConfig {
    fn from_env() -> Self {
        Self {
            port: env_u16_or_default(MEMORY_PORT, 50051),
            database_url: env_string(DATABASE_URL),
            salience_address: env_string_or_default(SALIENCE_ADDRESS, "http://localhost:50052"),
            ollama_base_url: env_string_or_default(OLLAMA_BASE_URL, "http://localhost:11434"),
            embedding_model: env_string_or_default(EMBEDDING_MODEL, "all-minilm"),
            embedding_dim: env_usize_or_default(EMBEDDING_DIM, gladys_core::DEFAULT_EMBEDDING_DIM),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gladys_memory=info,gladys_storage=info"));
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
    let config = EnvConfig::from_env();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "GLADyS Memory Store starting"
    );

    let storage: Arc<dyn StorageBackend> = match &config.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL");
            match PostgresStorage::connect(url, config.embedding_dim).await {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    error!(error = %e, "failed to initialize PostgreSQL storage");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory storage (data will not persist)");
            Arc::new(MemoryStorage::new())
        }
    };

    let embedder = Arc::new(
        OllamaEmbedder::new(config.ollama_base_url.clone())
            .with_model(config.embedding_model.clone())
            .with_dimension(config.embedding_dim),
    );

    let sink = match SalienceClient::new(ClientConfig::new(config.salience_address.clone())) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn gladys_memory::InvalidationSink>),
        Err(e) => {
            warn!(error = %e, "invalid SALIENCE_ADDRESS; invalidation notifications disabled");
            None
        }
    };

    let service = MemoryService::new(
        storage,
        embedder,
        sink,
        MemoryConfig {
            embedding_dim: config.embedding_dim,
        },
    );

    let addr: SocketAddr = match format!("0.0.0.0:{}", config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(port = config.port, error = %e, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    info!(
        %addr,
        database = config.database_url.as_ref().map(|_| "PostgreSQL").unwrap_or("In-memory"),
        embedding_model = %config.embedding_model,
        embedding_dim = config.embedding_dim,
        "Memory Store serving"
    );

    if let Err(e) = Server::builder()
        .add_service(MemoryStorageServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    info!("Memory Store shutdown complete");
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
