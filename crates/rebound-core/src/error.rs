//! Error types for lifecycle transitions, message handling and chaos
//! configuration.

use rebound_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Illegal use of a connection state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State the machine was in
        state: ConnectionState,
        /// Operation that was attempted
        operation: String,
    },
}

/// Reason an inbound message was answered with an `error` frame.
///
/// The `Display` text is the description sent to the peer. Every variant is
/// recovered locally; none is fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageFault {
    /// Payload failed to decode
    #[error("Failed to decode message: {0}")]
    MalformedFrame(#[from] ProtocolError),

    /// Chaos injector failed the message on purpose
    #[error("Simulated processing failure")]
    SimulatedFault,

    /// Decoded, but not a kind the server handles
    #[error("Unsupported message type: {0}")]
    UnsupportedKind(String),

    /// Text WebSocket message instead of a binary frame
    #[error("Text messages are not supported, send binary frames")]
    TextMessage,
}

/// Rejected chaos configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChaosConfigError {
    /// Probability outside `[0, 1]` (or NaN)
    #[error("{name} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Disconnect timer period of zero
    #[error("chaos disconnect interval must be greater than zero")]
    ZeroInterval,
}
