//! Rebound protocol core logic
//!
//! Pure state machine logic for the Rebound channel, decoupled from I/O.
//!
//! # Architecture
//!
//! Lifecycle logic is implemented as deterministic state machines that never
//! touch sockets, clocks or random number generators. Time and randomness are
//! supplied through [`env::Environment`]; transitions return declarative
//! actions that a runtime (the server, the client, or a simulation harness)
//! executes.
//!
//! # Components
//!
//! - [`connection`]: Server-side connection state machine
//! - [`client`]: Client-side connection state machine with reconnect
//! - [`session`]: Server session identity and duplicate-session detection
//! - [`chaos`]: Fault injection configuration and decisions
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`transport`]: Listener abstraction (accepting byte streams)
//! - [`error`]: Lifecycle and message error types

pub mod chaos;
pub mod client;
pub mod connection;
pub mod env;
pub mod error;
pub mod session;
pub mod transport;

pub use chaos::{ChaosConfig, ChaosInjector, ChaosVerdict};
pub use client::{ClientAction, ClientConnection, ClientEvent, ReconnectConfig};
pub use connection::{ConnectionAction, ConnectionId, ConnectionState, NORMAL_CLOSURE, ServerConnection};
pub use env::{Environment, SystemEnv};
pub use error::{ChaosConfigError, ConnectionError, MessageFault};
pub use session::{SessionDecision, SessionId, SessionTracker};
pub use transport::Listener;
