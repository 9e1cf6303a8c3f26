//! Core error types.
//!
//! The taxonomy follows the protocol contract: protocol violations and
//! transport failures are fatal for the channel, remote-handler faults travel
//! back as `Error` messages and surface as [`ChannelError::Remote`], and
//! resolution failures (unknown endpoint, object id, or symbol) take the same
//! `Error` path without closing the channel.

use spyglass_protocol::ProtocolError;
use thiserror::Error;

/// Channel-level errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Framing or decoding failure. Fatal; the channel is marked broken.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Orderly end-of-stream (zero-length read), distinct from decode errors.
    #[error("connection closed")]
    ConnectionClosed,

    /// A Return or Error arrived while no call was outstanding. Fatal.
    #[error("protocol desync: reply received with nothing pending")]
    Desync,

    /// The peer's handler faulted while servicing our call. The channel
    /// remains usable.
    #[error("remote fault: {message}")]
    Remote { message: String, detail: String },

    #[error("channel is not attached to a connection")]
    NotAttached,

    #[error("channel is already attached to a connection")]
    AlreadyAttached,

    #[error("cannot bind endpoint {0:?} after attach")]
    BindAfterAttach(String),

    /// A previous fatal error left the channel unusable.
    #[error("channel is broken")]
    Broken,

    /// The cooperative invoke deadline expired; the channel is marked broken
    /// since the protocol has no mid-stream resynchronization.
    #[error("invoke timed out")]
    Timeout,
}

/// Faults raised by object operations, handlers, and the envelope.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("{type_name} does not support {op}")]
    Unsupported {
        type_name: &'static str,
        op: &'static str,
    },

    #[error("{type_name} has no attribute {name:?}")]
    NoSuchAttribute {
        type_name: &'static str,
        name: String,
    },

    #[error("no such item: {0}")]
    NoSuchItem(String),

    #[error("unknown object id: {0}")]
    NotFound(u64),

    #[error("cannot resolve {}", Self::dotted(module, member.as_deref()))]
    Unresolvable {
        module: String,
        member: Option<String>,
    },

    #[error("unknown procedure: {module}.{name}")]
    UnknownProcedure { module: String, name: String },

    /// A value being serialized was found on the in-progress stack in a slot
    /// the back-reference scheme does not cover.
    #[error("cyclic value cannot be serialized")]
    CyclicValue,

    /// A remote-object stub cannot be sent back over the wire: references
    /// carry no owner marking, so the receiving side would resolve the id
    /// against the wrong store.
    #[error("a remote proxy cannot be forwarded over the wire")]
    ProxyForwarding,

    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Application-level fault raised by an object or procedure.
    #[error("{0}")]
    App(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ObjectError {
    /// Convenience constructor for application faults.
    pub fn app(message: impl Into<String>) -> Self {
        ObjectError::App(message.into())
    }

    fn dotted(module: &str, member: Option<&str>) -> String {
        match member {
            Some(m) => format!("{module}.{m}"),
            None => module.to_string(),
        }
    }
}

/// Errors surfaced by proxy operations and envelope round trips: either the
/// channel failed or an object-level fault occurred.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Object(#[from] ObjectError),
}

impl RpcError {
    /// Returns the remote fault message, if this is one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Channel(ChannelError::Remote { message, .. }) => Some(message),
            _ => None,
        }
    }
}
