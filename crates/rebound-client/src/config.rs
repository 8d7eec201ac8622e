//! Client configuration.

use std::time::Duration;

use rebound_core::ReconnectConfig;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Startup configuration. Immutable once the client runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server endpoint
    pub url: String,
    /// Delay between a closure and the next dial
    pub reconnect_delay: Duration,
    /// Close connections that announce the previous session again
    pub suppress_duplicate_sessions: bool,
    /// Largest accepted WebSocket message, in bytes
    pub max_message_size: usize,
    /// How long to wait for the server's close reply
    pub close_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            url: "ws://localhost:3000/".to_string(),
            reconnect_delay: reconnect.delay,
            suppress_duplicate_sessions: reconnect.suppress_duplicate_sessions,
            max_message_size: 1_048_576,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Client pointed at `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Reconnect policy for the state machine.
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            delay: self.reconnect_delay,
            suppress_duplicate_sessions: self.suppress_duplicate_sessions,
        }
    }

    /// WebSocket limits for every dial.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}
