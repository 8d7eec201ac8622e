//! Server-side connection state machine.
//!
//! One [`ServerConnection`] exists per accepted transport handle, owned by the
//! task driving that handle.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods take the event that happened (bytes arrived, timer fired,
//!   shutdown requested) and return `Vec<ConnectionAction>`
//! - The driver executes actions (encode and send a frame, close the socket)
//! - Chaos draws are made by the driver and passed in as plain values
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  open   ┌──────┐  shutdown / chaos / peer close  ┌─────────┐
//! │ Connecting │────────>│ Open │────────────────────────────────>│ Closing │
//! └────────────┘         └──────┘                                 └─────────┘
//!                           │ transport closed                         │
//!                           ↓                                          ↓
//!                       ┌────────┐<────────────────────────────────────┘
//!                       │ Closed │
//!                       └────────┘
//! ```
//!
//! Events arriving after the connection left `Open` are dropped.

use std::fmt;

use rebound_proto::{Frame, MessageKind};

use crate::{
    error::{ConnectionError, MessageFault},
    session::SessionId,
};

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Per-process identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state shared by server and client connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handshake in progress
    Connecting,
    /// Handshake done, frames flowing
    Open,
    /// Close initiated by either side, waiting for the transport to finish
    Closing,
    /// Terminal
    Closed,
}

/// Actions returned by the server connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Encode and send this frame to the peer
    SendFrame(Frame),

    /// Close the transport
    Close {
        /// WebSocket close code
        code: u16,
        /// Human-readable close reason
        reason: String,
    },
}

/// Server side of one connection.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    id: ConnectionId,
    session: SessionId,
    state: ConnectionState,
    messages_handled: u64,
}

impl ServerConnection {
    /// Connection in `Connecting` state, belonging to `session`.
    pub fn new(id: ConnectionId, session: SessionId) -> Self {
        Self { id, session, state: ConnectionState::Connecting, messages_handled: 0 }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session this connection was accepted under.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of inbound messages answered so far.
    pub fn messages_handled(&self) -> u64 {
        self.messages_handled
    }

    /// Transport accepted. Announces the session before anything else.
    ///
    /// # Errors
    /// Returns `InvalidState` unless in `Connecting`.
    pub fn open(&mut self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "open".to_string(),
            });
        }

        self.state = ConnectionState::Open;
        tracing::info!(connection = %self.id, server_id = %self.session, "connection open");

        Ok(vec![ConnectionAction::SendFrame(Frame::server_info(self.session.to_string()))])
    }

    /// Answer an inbound binary message that passed the chaos screen.
    ///
    /// Produces a `response` for `message` frames and an `error` for anything
    /// that fails to decode or is not a `message`.
    pub fn handle_message(&mut self, payload: &[u8]) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Open {
            tracing::debug!(connection = %self.id, state = ?self.state, "dropping message after open");
            return Vec::new();
        }

        self.messages_handled += 1;
        match self.reply_to(payload) {
            Ok(frame) => vec![ConnectionAction::SendFrame(frame)],
            Err(fault) => self.fault_reply(&fault),
        }
    }

    /// Answer an inbound message that failed before decoding.
    pub fn handle_fault(&mut self, fault: &MessageFault) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }

        self.messages_handled += 1;
        self.fault_reply(fault)
    }

    /// Chaos disconnect timer fired; `disconnect` is the injector's draw.
    pub fn chaos_tick(&mut self, disconnect: bool) -> Vec<ConnectionAction> {
        if !disconnect || self.state != ConnectionState::Open {
            return Vec::new();
        }

        tracing::warn!(connection = %self.id, "chaos: forcing disconnect");
        self.state = ConnectionState::Closing;
        vec![
            ConnectionAction::SendFrame(Frame::chaos("Chaos monkey: simulated disconnect")),
            ConnectionAction::Close { code: NORMAL_CLOSURE, reason: "chaos disconnect".to_string() },
        ]
    }

    /// Server is shutting down.
    ///
    /// Emits the `shutdown` notice and the close exactly once; later calls
    /// return nothing.
    pub fn shutdown(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }

        self.state = ConnectionState::Closing;
        vec![
            ConnectionAction::SendFrame(Frame::shutdown(
                self.session.to_string(),
                format!("Server {} is shutting down", self.session),
            )),
            ConnectionAction::Close { code: NORMAL_CLOSURE, reason: "server shutdown".to_string() },
        ]
    }

    /// Peer started the close handshake.
    pub fn peer_closing(&mut self) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            self.state = ConnectionState::Closing;
        }
    }

    /// Transport is gone, cleanly or not.
    pub fn transport_closed(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::info!(
                connection = %self.id,
                messages = self.messages_handled,
                "connection closed"
            );
        }
        self.state = ConnectionState::Closed;
    }

    fn reply_to(&self, payload: &[u8]) -> Result<Frame, MessageFault> {
        let decoded = Frame::decode(payload)?;
        tracing::trace!(connection = %self.id, raw = %decoded.raw_hex(), "decoded frame");

        match decoded.message_kind() {
            Some(MessageKind::Message) => {
                let content = decoded.content.as_deref().unwrap_or_default();
                tracing::debug!(connection = %self.id, content, "message received");
                Ok(Frame::response(
                    self.session.to_string(),
                    format!("Server {} received: {content}", self.session),
                ))
            },
            _ => Err(MessageFault::UnsupportedKind(
                decoded.kind.clone().unwrap_or_else(|| "<none>".to_string()),
            )),
        }
    }

    fn fault_reply(&self, fault: &MessageFault) -> Vec<ConnectionAction> {
        tracing::warn!(connection = %self.id, error = %fault, "message failed");
        vec![ConnectionAction::SendFrame(Frame::error(fault.to_string()))]
    }
}
