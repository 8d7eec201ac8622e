//! Client error types.

use rebound_proto::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors returned to client callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No surfaced connection is open
    #[error("not connected")]
    NotConnected,

    /// Client was torn down or its task exited
    #[error("client stopped")]
    Stopped,

    /// Message could not be encoded
    #[error("failed to encode message: {0}")]
    Encode(#[from] ProtocolError),

    /// WebSocket transport failed
    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),

    /// Connector could not reach the server
    #[error("connect failed: {0}")]
    Connect(String),
}

impl From<tungstenite::Error> for ClientError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}
