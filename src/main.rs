//! spyglass - bidirectional object RPC server
//!
//! Serves the built-in object endpoints over TCP. Applications embed
//! `spyglass-server` directly to register procedures, namespaces, and
//! endpoints of their own; this binary runs a bare server, useful for
//! wire-level testing and as a deployment skeleton.

use std::sync::Arc;

use spyglass_core::{ProcedureRegistry, StaticNamespace};
use spyglass_server::{Config, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SPYGLASS_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("SPYGLASS_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("SPYGLASS_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting spyglass server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_connections(config.network.max_connections)
        .with_channel(config.channel.channel_config());

    let server = Arc::new(Server::new(
        server_config,
        Arc::new(ProcedureRegistry::new()),
        Arc::new(StaticNamespace::new()),
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
