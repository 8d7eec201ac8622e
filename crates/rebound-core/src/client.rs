//! Client-side connection state machine with fixed-interval reconnect.
//!
//! [`ClientConnection`] spans many transport connections: each dial moves it
//! `Closed → Connecting → Open`, and every closure schedules the next dial
//! after a fixed delay until the client is torn down. There is no retry limit
//! and no backoff.
//!
//! The machine never sleeps. It returns [`ClientAction::ScheduleReconnect`]
//! and the runtime calls [`ClientConnection::reconnect_due`] once the delay has
//! elapsed, which lets tests advance logical time by hand.
//!
//! # Session identity
//!
//! The first frame on every connection is `server_info`. The
//! [`SessionTracker`] compares its `serverId` with the preceding attempt; a
//! repeat means the client merely reached the same server run again, and the
//! new connection is closed without being surfaced.

use std::time::Duration;

use rebound_proto::{Frame, MessageKind};

use crate::{
    connection::{ConnectionState, NORMAL_CLOSURE},
    error::ConnectionError,
    session::{SessionDecision, SessionTracker},
};

/// Reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay between a closure and the next dial
    pub delay: Duration,
    /// Close connections that announce the previous session again.
    ///
    /// When false such connections stay open and surface as
    /// [`ClientEvent::SessionResumed`].
    pub suppress_duplicate_sessions: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { delay: Duration::from_secs(3), suppress_duplicate_sessions: true }
    }
}

/// Events surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connected to a server run not seen on the preceding attempt
    SessionStarted {
        /// Announced session identifier
        server_id: String,
    },
    /// Connected to the same server run again (duplicate suppression off)
    SessionResumed {
        /// Announced session identifier
        server_id: String,
    },
    /// Server answered a message
    Response {
        /// Response text
        content: String,
        /// Session that produced the response
        server_id: Option<String>,
    },
    /// Server reported a failure, or a server frame failed to decode
    Error {
        /// Failure description
        content: String,
    },
    /// Informational `shutdown` or `chaos` notice
    Notice {
        /// Which notice
        kind: MessageKind,
        /// Notice text
        content: String,
    },
    /// Frame of a kind the client does not handle
    Unrecognized {
        /// The decoded frame
        frame: Frame,
    },
    /// A surfaced connection ended
    Disconnected {
        /// Close reason or transport error, if known
        reason: Option<String>,
    },
}

/// Actions returned by the client state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Start a transport handshake
    Dial,
    /// Close the live transport
    Close {
        /// WebSocket close code
        code: u16,
        /// Human-readable close reason
        reason: String,
    },
    /// Call [`ClientConnection::reconnect_due`] after this delay
    ScheduleReconnect {
        /// Delay before the next dial
        after: Duration,
    },
    /// Drop any pending reconnect timer
    CancelReconnect,
    /// Hand this event to the user
    Surface(ClientEvent),
}

/// Client lifecycle across reconnects.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    state: ConnectionState,
    config: ReconnectConfig,
    tracker: SessionTracker,
    attempts: u64,
    surfaced: bool,
    torn_down: bool,
}

impl ClientConnection {
    /// Idle client; call [`Self::connect`] to start.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            config,
            tracker: SessionTracker::new(),
            attempts: 0,
            surfaced: false,
            torn_down: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of dials started.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Whether [`Self::teardown`] was called.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Session announced on the last accepted connection.
    pub fn last_server_id(&self) -> Option<&str> {
        self.tracker.last_server_id()
    }

    /// Request a dial.
    ///
    /// Does nothing while an attempt is already connecting, open or closing,
    /// or after teardown, so repeated requests never stack handshakes.
    pub fn connect(&mut self) -> Vec<ClientAction> {
        if self.torn_down {
            tracing::debug!("connect ignored after teardown");
            return Vec::new();
        }

        if self.state != ConnectionState::Closed {
            tracing::debug!(state = ?self.state, "connect suppressed, attempt in flight");
            return Vec::new();
        }

        self.state = ConnectionState::Connecting;
        self.attempts += 1;
        self.surfaced = false;
        tracing::debug!(attempt = self.attempts, "dialing");
        vec![ClientAction::Dial]
    }

    /// Transport handshake succeeded.
    ///
    /// # Errors
    /// Returns `InvalidState` unless in `Connecting`.
    pub fn handshake_complete(&mut self) -> Result<Vec<ClientAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "handshake_complete".to_string(),
            });
        }

        self.state = ConnectionState::Open;
        Ok(Vec::new())
    }

    /// Transport handshake failed.
    pub fn connect_failed(&mut self, reason: &str) -> Vec<ClientAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }

        tracing::warn!(attempt = self.attempts, reason, "connection attempt failed");
        self.state = ConnectionState::Closed;
        self.schedule_reconnect()
    }

    /// Binary message received on the live transport.
    pub fn handle_bytes(&mut self, payload: &[u8]) -> Vec<ClientAction> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }

        match Frame::decode(payload) {
            Ok(decoded) => {
                tracing::trace!(raw = %decoded.raw_hex(), "decoded frame");
                self.handle_frame(decoded.frame())
            },
            Err(e) => vec![ClientAction::Surface(ClientEvent::Error {
                content: format!("Failed to decode server frame: {e}"),
            })],
        }
    }

    /// Decoded frame received on the live transport.
    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<ClientAction> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }

        let content = frame.content.clone().unwrap_or_default();
        let event = match frame.message_kind() {
            Some(MessageKind::ServerInfo) => return self.on_server_info(frame),
            Some(MessageKind::Response) => {
                ClientEvent::Response { content, server_id: frame.server_id.clone() }
            },
            Some(MessageKind::Error) => ClientEvent::Error { content },
            // Informational only; the transport close that follows drives the
            // lifecycle
            Some(kind @ (MessageKind::Shutdown | MessageKind::Chaos)) => {
                ClientEvent::Notice { kind, content }
            },
            Some(MessageKind::Message) | None => ClientEvent::Unrecognized { frame: frame.clone() },
        };

        vec![ClientAction::Surface(event)]
    }

    /// Transport closed, cleanly or with an error.
    pub fn transport_closed(&mut self, reason: Option<String>) -> Vec<ClientAction> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }

        self.state = ConnectionState::Closed;
        let mut actions = Vec::new();
        if self.surfaced {
            self.surfaced = false;
            actions.push(ClientAction::Surface(ClientEvent::Disconnected { reason }));
        }
        actions.extend(self.schedule_reconnect());
        actions
    }

    /// The reconnect delay elapsed.
    pub fn reconnect_due(&mut self) -> Vec<ClientAction> {
        self.connect()
    }

    /// Deliberate client shutdown. No reconnect is scheduled afterwards.
    pub fn teardown(&mut self) -> Vec<ClientAction> {
        if self.torn_down {
            return Vec::new();
        }

        self.torn_down = true;
        let mut actions = vec![ClientAction::CancelReconnect];
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                actions.push(ClientAction::Close {
                    code: NORMAL_CLOSURE,
                    reason: "client teardown".to_string(),
                });
            },
            // Dial is abandoned by the runtime
            ConnectionState::Connecting => self.state = ConnectionState::Closed,
            ConnectionState::Closing | ConnectionState::Closed => {},
        }
        actions
    }

    fn on_server_info(&mut self, frame: &Frame) -> Vec<ClientAction> {
        let Some(server_id) = frame.server_id.clone() else {
            return vec![ClientAction::Surface(ClientEvent::Error {
                content: "server_info without serverId".to_string(),
            })];
        };

        match self.tracker.observe(&server_id) {
            SessionDecision::New => {
                tracing::info!(server_id = %server_id, "new server session");
                self.surfaced = true;
                vec![ClientAction::Surface(ClientEvent::SessionStarted { server_id })]
            },
            SessionDecision::Duplicate if self.config.suppress_duplicate_sessions => {
                tracing::info!(server_id = %server_id, "same session as previous attempt, closing duplicate");
                self.state = ConnectionState::Closing;
                vec![ClientAction::Close {
                    code: NORMAL_CLOSURE,
                    reason: "duplicate session".to_string(),
                }]
            },
            SessionDecision::Duplicate => {
                self.surfaced = true;
                vec![ClientAction::Surface(ClientEvent::SessionResumed { server_id })]
            },
        }
    }

    fn schedule_reconnect(&self) -> Vec<ClientAction> {
        if self.torn_down {
            return Vec::new();
        }
        vec![ClientAction::ScheduleReconnect { after: self.config.delay }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_client() -> ClientConnection {
        let mut client = ClientConnection::new(ReconnectConfig::default());
        assert_eq!(client.connect(), vec![ClientAction::Dial]);
        client.handshake_complete().unwrap();
        client
    }

    fn announce(client: &mut ClientConnection, server_id: &str) -> Vec<ClientAction> {
        let bytes = Frame::server_info(server_id).to_bytes().unwrap();
        client.handle_bytes(&bytes)
    }

    fn reconnect(client: &mut ClientConnection) {
        assert_eq!(client.reconnect_due(), vec![ClientAction::Dial]);
        client.handshake_complete().unwrap();
    }

    #[test]
    fn first_server_info_starts_session() {
        let mut client = open_client();
        let actions = announce(&mut client, "s1");

        assert_eq!(
            actions,
            vec![ClientAction::Surface(ClientEvent::SessionStarted { server_id: "s1".to_string() })]
        );
        assert_eq!(client.last_server_id(), Some("s1"));
    }

    #[test]
    fn duplicate_session_is_closed_without_surfacing() {
        let mut client = open_client();
        announce(&mut client, "s1");

        let actions = client.transport_closed(None);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], ClientAction::Surface(ClientEvent::Disconnected { .. })));
        assert_eq!(actions[1], ClientAction::ScheduleReconnect { after: Duration::from_secs(3) });

        reconnect(&mut client);
        let actions = announce(&mut client, "s1");
        assert_eq!(
            actions,
            vec![ClientAction::Close { code: NORMAL_CLOSURE, reason: "duplicate session".to_string() }]
        );
        assert_eq!(client.state(), ConnectionState::Closing);

        // The suppressed connection never surfaced, so its close is silent
        let actions = client.transport_closed(None);
        assert_eq!(actions, vec![ClientAction::ScheduleReconnect { after: Duration::from_secs(3) }]);
    }

    #[test]
    fn duplicates_suppressed_on_every_repeat() {
        let mut client = open_client();
        announce(&mut client, "s1");

        for _ in 0..4 {
            client.transport_closed(None);
            reconnect(&mut client);
            let actions = announce(&mut client, "s1");
            assert!(matches!(actions.as_slice(), [ClientAction::Close { .. }]));
        }
    }

    #[test]
    fn restarted_server_is_new_session() {
        let mut client = open_client();
        announce(&mut client, "s1");
        client.transport_closed(Some("server restart".to_string()));

        reconnect(&mut client);
        let actions = announce(&mut client, "s2");
        assert_eq!(
            actions,
            vec![ClientAction::Surface(ClientEvent::SessionStarted { server_id: "s2".to_string() })]
        );
    }

    #[test]
    fn duplicate_resumes_when_suppression_disabled() {
        let config = ReconnectConfig { suppress_duplicate_sessions: false, ..Default::default() };
        let mut client = ClientConnection::new(config);
        client.connect();
        client.handshake_complete().unwrap();
        announce(&mut client, "s1");
        client.transport_closed(None);

        reconnect(&mut client);
        let actions = announce(&mut client, "s1");
        assert_eq!(
            actions,
            vec![ClientAction::Surface(ClientEvent::SessionResumed { server_id: "s1".to_string() })]
        );
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[test]
    fn connect_is_idempotent_while_in_flight() {
        let mut client = ClientConnection::new(ReconnectConfig::default());
        assert_eq!(client.connect(), vec![ClientAction::Dial]);
        assert!(client.connect().is_empty());
        assert!(client.reconnect_due().is_empty());

        client.handshake_complete().unwrap();
        assert!(client.connect().is_empty());
        assert_eq!(client.attempts(), 1);
    }

    #[test]
    fn failed_dial_retries_after_fixed_delay() {
        let mut client = ClientConnection::new(ReconnectConfig::default());
        for attempt in 1..=5 {
            assert_eq!(client.connect(), vec![ClientAction::Dial]);
            let actions = client.connect_failed("connection refused");
            assert_eq!(actions, vec![ClientAction::ScheduleReconnect { after: Duration::from_secs(3) }]);
            assert_eq!(client.attempts(), attempt);
        }
    }

    #[test]
    fn shutdown_notice_does_not_close() {
        let mut client = open_client();
        announce(&mut client, "s1");

        let bytes = Frame::shutdown("s1", "Server s1 is shutting down").to_bytes().unwrap();
        let actions = client.handle_bytes(&bytes);
        assert_eq!(
            actions,
            vec![ClientAction::Surface(ClientEvent::Notice {
                kind: MessageKind::Shutdown,
                content: "Server s1 is shutting down".to_string(),
            })]
        );
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[test]
    fn response_and_error_are_surfaced() {
        let mut client = open_client();
        announce(&mut client, "s1");

        let response = Frame::response("s1", "Server s1 received: ping").to_bytes().unwrap();
        assert_eq!(
            client.handle_bytes(&response),
            vec![ClientAction::Surface(ClientEvent::Response {
                content: "Server s1 received: ping".to_string(),
                server_id: Some("s1".to_string()),
            })]
        );

        let error = Frame::error("Simulated processing failure").to_bytes().unwrap();
        assert_eq!(
            client.handle_bytes(&error),
            vec![ClientAction::Surface(ClientEvent::Error {
                content: "Simulated processing failure".to_string(),
            })]
        );
    }

    #[test]
    fn malformed_server_frame_is_surfaced_as_error() {
        let mut client = open_client();
        let actions = client.handle_bytes(&[2, 0, 0, 0, 9, b'x']);

        assert!(matches!(
            actions.as_slice(),
            [ClientAction::Surface(ClientEvent::Error { content })] if content.starts_with("Failed to decode")
        ));
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[test]
    fn teardown_stops_reconnects() {
        let mut client = open_client();
        announce(&mut client, "s1");

        let actions = client.teardown();
        assert_eq!(actions[0], ClientAction::CancelReconnect);
        assert!(matches!(actions[1], ClientAction::Close { code: NORMAL_CLOSURE, .. }));

        let actions = client.transport_closed(None);
        assert_eq!(actions, vec![ClientAction::Surface(ClientEvent::Disconnected { reason: None })]);

        assert!(client.reconnect_due().is_empty());
        assert!(client.connect().is_empty());
        assert!(client.teardown().is_empty());
    }

    #[test]
    fn handshake_outside_connecting_is_invalid() {
        let mut client = ClientConnection::new(ReconnectConfig::default());
        assert!(matches!(client.handshake_complete(), Err(ConnectionError::InvalidState { .. })));
    }
}
