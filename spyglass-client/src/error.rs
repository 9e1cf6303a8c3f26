//! Client error types.

use thiserror::Error;

use spyglass_core::{ChannelError, ObjectError, RpcError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Channel(e) => ClientError::Channel(e),
            RpcError::Object(e) => ClientError::Object(e),
        }
    }
}

impl ClientError {
    /// Returns whether reconnecting could help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectTimeout
                | ClientError::Channel(
                    ChannelError::ConnectionClosed | ChannelError::Timeout | ChannelError::Broken
                )
        )
    }
}
