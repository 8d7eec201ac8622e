//! Server configuration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use rebound_core::ChaosConfig;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::ServerError;

/// Startup configuration. Immutable once the server runs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address
    pub bind: SocketAddr,
    /// Request path of the WebSocket endpoint
    pub path: String,
    /// Largest accepted WebSocket message, in bytes
    pub max_message_size: usize,
    /// How long to wait for the peer's close reply after closing
    pub close_grace: Duration,
    /// Upper bound on the whole shutdown sequence (enforced by the binary)
    pub shutdown_timeout: Duration,
    /// Fault injection parameters
    pub chaos: ChaosConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000)),
            path: "/".to_string(),
            max_message_size: 1_048_576,
            close_grace: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
            chaos: ChaosConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !self.path.starts_with('/') {
            return Err(ServerError::Config(format!("path {:?} must start with '/'", self.path)));
        }
        if self.max_message_size == 0 {
            return Err(ServerError::Config("max_message_size must be greater than zero".into()));
        }
        self.chaos.validate()?;
        Ok(())
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}
