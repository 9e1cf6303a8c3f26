//! TCP server implementation.
//!
//! Each accepted connection gets its own channel, envelope, and object
//! store; nothing is shared between connections except the procedure
//! registry, the namespace, and the application endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

use spyglass_core::{
    Channel, ChannelConfig, Envelope, Handler, Namespace, ProcedureRegistry,
};

use crate::error::ServerError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Channel configuration applied to every connection.
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], spyglass_protocol::DEFAULT_PORT)),
            max_connections: 1000,
            channel: ChannelConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for spyglass.
pub struct Server {
    config: ServerConfig,
    registry: Arc<ProcedureRegistry>,
    namespace: Arc<dyn Namespace>,
    endpoints: Vec<(String, Handler)>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(
        config: ServerConfig,
        registry: Arc<ProcedureRegistry>,
        namespace: Arc<dyn Namespace>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            namespace,
            endpoints: Vec::new(),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Registers an application endpoint, served on every connection.
    pub fn bind(&mut self, name: impl Into<String>, handler: Handler) {
        self.endpoints.push((name.into(), handler));
    }

    /// Runs the server on the configured address.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Runs the server on an already-bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let registry = self.registry.clone();
                            let namespace = self.namespace.clone();
                            let endpoints = self.endpoints.clone();
                            let channel_config = self.config.channel.clone();
                            let stats = self.stats.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let conn_id = Uuid::new_v4();
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    conn_id,
                                    channel_config,
                                    registry,
                                    namespace,
                                    endpoints,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("[{}] Connection error: {}", conn_id, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("[{}] Client disconnected: {}", conn_id, addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serves one connection until the peer disconnects or shutdown.
    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        conn_id: Uuid,
        channel_config: ChannelConfig,
        registry: Arc<ProcedureRegistry>,
        namespace: Arc<dyn Namespace>,
        endpoints: Vec<(String, Handler)>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("[{}] Client connected: {}", conn_id, addr);
        let _ = stream.set_nodelay(true);

        let channel = Arc::new(Channel::new(channel_config));
        for (name, handler) in endpoints {
            channel.bind(name, handler)?;
        }
        let _envelope = Envelope::new(&channel, registry, namespace)?;
        channel.attach(stream).await?;

        tokio::select! {
            result = channel.serve() => {
                result?;
                Ok(())
            }
            _ = shutdown.recv() => {
                tracing::debug!("[{}] Shutdown signal received", conn_id);
                channel.close().await?;
                Err(ServerError::ShuttingDown)
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
