//! High-level client API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use spyglass_core::{
    Channel, ChannelConfig, Envelope, Handler, Kwargs, Namespace, ObjValue, ObjectProxy,
    ProcedureRegistry,
};

use crate::error::ClientError;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Channel configuration.
    pub channel: ChannelConfig,
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel: ChannelConfig::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// A connected client: one channel plus its serialization envelope.
///
/// The client side can also serve calls; bind endpoints at connect time and
/// run [`Client::serve`] when the application expects the server to call in.
pub struct Client {
    channel: Arc<Channel>,
    envelope: Arc<Envelope>,
}

impl Client {
    /// Connects to a server. `endpoints` are bound before the connection is
    /// attached, so the server never sees a half-built surface.
    pub async fn connect(
        config: ClientConfig,
        registry: Arc<ProcedureRegistry>,
        namespace: Arc<dyn Namespace>,
        endpoints: Vec<(String, Handler)>,
    ) -> Result<Client, ClientError> {
        let channel = Arc::new(Channel::new(config.channel));
        for (name, handler) in endpoints {
            channel.bind(name, handler)?;
        }
        let envelope = Envelope::new(&channel, registry, namespace)?;

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        let _ = stream.set_nodelay(true);
        channel.attach(stream).await?;

        tracing::debug!("Connected to {}", config.addr);
        Ok(Client { channel, envelope })
    }

    /// Calls a named endpoint on the server.
    pub async fn invoke(
        &self,
        procedure: &str,
        args: Vec<ObjValue>,
        kwargs: Kwargs,
    ) -> Result<ObjValue, ClientError> {
        let mut wire_args = Vec::with_capacity(args.len());
        for arg in &args {
            wire_args.push(self.envelope.serialize(arg)?);
        }
        let mut wire_kwargs = std::collections::HashMap::with_capacity(kwargs.len());
        for (key, value) in &kwargs {
            wire_kwargs.insert(key.clone(), self.envelope.serialize(value)?);
        }
        let reply = self
            .channel
            .invoke(procedure, wire_args, wire_kwargs)
            .await?;
        Ok(self.envelope.deserialize(&reply)?)
    }

    /// Sends a capture or named value to the server and returns a proxy to
    /// the object the server built from it.
    pub async fn export(&self, value: &ObjValue) -> Result<ObjectProxy, ClientError> {
        let wire = self.envelope.serialize(value)?;
        let reply = self.envelope.remote_call("add_obj", vec![wire]).await?;
        match self.envelope.deserialize(&reply)? {
            ObjValue::Proxy(proxy) => Ok(proxy),
            other => Err(ClientError::UnexpectedReply(format!(
                "add_obj returned {}",
                other.type_label()
            ))),
        }
    }

    /// Resolves a global, locally if possible, otherwise from the server.
    pub async fn global(&self, module: &str, name: &str) -> Result<ObjValue, ClientError> {
        self.envelope.global(module, name).await.map_err(Into::into)
    }

    /// Serves incoming calls from the server until it disconnects.
    pub async fn serve(&self) -> Result<(), ClientError> {
        self.channel.serve().await.map_err(Into::into)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.channel.close().await.map_err(Into::into)
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_attached() && !self.channel.is_broken()
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}
