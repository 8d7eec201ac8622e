//! Reference model of the client lifecycle.
//!
//! [`ClientModel`] restates the reconnect and session rules as plainly as
//! possible. Model-based tests and the lifecycle fuzz target drive it side by
//! side with a real [`ClientConnection`] and compare every [`Outcome`].

use arbitrary::Arbitrary;
use rebound_core::{ClientAction, ClientConnection, ClientEvent, ConnectionState, ReconnectConfig};
use rebound_proto::{Frame, MessageKind};

/// Number of distinct server sessions operations can announce.
pub const SESSIONS: u8 = 3;

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// User or runtime requests a dial
    Connect,
    /// Dial succeeded
    HandshakeOk,
    /// Dial failed
    HandshakeFailed,
    /// `server_info` for session `session % SESSIONS`
    ServerInfo {
        /// Session index
        session: u8,
    },
    /// `response` frame
    Response,
    /// `shutdown` notice
    ShutdownNotice,
    /// Transport ended
    TransportClosed,
    /// Reconnect delay elapsed
    ReconnectDue,
    /// Client teardown
    Teardown,
}

/// Session identifier announced by [`Operation::ServerInfo`].
pub fn session_name(session: u8) -> String {
    format!("session-{}", session % SESSIONS)
}

impl Operation {
    /// Apply this operation to the real state machine.
    pub fn apply_to(&self, conn: &mut ClientConnection) -> Vec<ClientAction> {
        match self {
            Self::Connect => conn.connect(),
            // Out-of-state completions are the runtime's bug, not the user's
            Self::HandshakeOk => conn.handshake_complete().unwrap_or_default(),
            Self::HandshakeFailed => conn.connect_failed("refused"),
            Self::ServerInfo { session } => conn.handle_frame(&Frame::server_info(session_name(*session))),
            Self::Response => conn.handle_frame(&Frame::response("any", "reply")),
            Self::ShutdownNotice => conn.handle_frame(&Frame::shutdown("any", "bye")),
            Self::TransportClosed => conn.transport_closed(None),
            Self::ReconnectDue => conn.reconnect_due(),
            Self::Teardown => conn.teardown(),
        }
    }
}

/// Observable result of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// A dial was requested
    pub dialed: bool,
    /// The live transport was closed
    pub closed: bool,
    /// A reconnect was scheduled
    pub reconnect_scheduled: bool,
    /// Pending reconnects were cancelled
    pub reconnect_cancelled: bool,
    /// Events surfaced, in order
    pub events: Vec<ClientEvent>,
}

impl Outcome {
    /// Summarize real actions.
    pub fn from_actions(actions: &[ClientAction]) -> Self {
        let mut outcome = Self::default();
        for action in actions {
            match action {
                ClientAction::Dial => outcome.dialed = true,
                ClientAction::Close { .. } => outcome.closed = true,
                ClientAction::ScheduleReconnect { .. } => outcome.reconnect_scheduled = true,
                ClientAction::CancelReconnect => outcome.reconnect_cancelled = true,
                ClientAction::Surface(event) => outcome.events.push(event.clone()),
            }
        }
        outcome
    }
}

/// Reference implementation of the client lifecycle.
#[derive(Debug, Clone)]
pub struct ClientModel {
    state: ConnectionState,
    suppress_duplicates: bool,
    torn_down: bool,
    surfaced: bool,
    last_server_id: Option<String>,
}

impl ClientModel {
    /// Model matching `config`.
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            suppress_duplicates: config.suppress_duplicate_sessions,
            torn_down: false,
            surfaced: false,
            last_server_id: None,
        }
    }

    /// Expected lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether teardown happened.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Expected remembered session.
    pub fn last_server_id(&self) -> Option<&str> {
        self.last_server_id.as_deref()
    }

    /// Apply an operation and return what the real machine should do.
    pub fn apply(&mut self, op: &Operation) -> Outcome {
        let mut out = Outcome::default();
        let open = self.state == ConnectionState::Open;

        match op {
            Operation::Connect | Operation::ReconnectDue => {
                if !self.torn_down && self.state == ConnectionState::Closed {
                    self.state = ConnectionState::Connecting;
                    self.surfaced = false;
                    out.dialed = true;
                }
            },
            Operation::HandshakeOk => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                }
            },
            Operation::HandshakeFailed => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Closed;
                    out.reconnect_scheduled = !self.torn_down;
                }
            },
            Operation::ServerInfo { session } if open => {
                let server_id = session_name(*session);
                if self.last_server_id.as_deref() != Some(server_id.as_str()) {
                    self.last_server_id = Some(server_id.clone());
                    self.surfaced = true;
                    out.events.push(ClientEvent::SessionStarted { server_id });
                } else if self.suppress_duplicates {
                    self.state = ConnectionState::Closing;
                    out.closed = true;
                } else {
                    self.surfaced = true;
                    out.events.push(ClientEvent::SessionResumed { server_id });
                }
            },
            Operation::Response if open => out.events.push(ClientEvent::Response {
                content: "reply".to_string(),
                server_id: Some("any".to_string()),
            }),
            Operation::ShutdownNotice if open => out.events.push(ClientEvent::Notice {
                kind: MessageKind::Shutdown,
                content: "bye".to_string(),
            }),
            Operation::ServerInfo { .. } | Operation::Response | Operation::ShutdownNotice => {},
            Operation::TransportClosed => {
                if self.state != ConnectionState::Closed {
                    self.state = ConnectionState::Closed;
                    if self.surfaced {
                        self.surfaced = false;
                        out.events.push(ClientEvent::Disconnected { reason: None });
                    }
                    out.reconnect_scheduled = !self.torn_down;
                }
            },
            Operation::Teardown => {
                if !self.torn_down {
                    self.torn_down = true;
                    out.reconnect_cancelled = true;
                    match self.state {
                        ConnectionState::Open => {
                            self.state = ConnectionState::Closing;
                            out.closed = true;
                        },
                        ConnectionState::Connecting => self.state = ConnectionState::Closed,
                        ConnectionState::Closing | ConnectionState::Closed => {},
                    }
                }
            },
        }

        out
    }
}
