//! Rebound client
//!
//! Drives a [`rebound_core::ClientConnection`] over a real WebSocket:
//! dials through a [`Connector`], reconnects on a fixed delay until torn
//! down, and hands [`rebound_core::ClientEvent`]s to the caller.
//!
//! ```text
//! ClientHandle ──commands──> ReconnectingClient ──events──> caller
//!                                  │
//!                             Connector::connect
//! ```

pub mod commands;
pub mod config;
pub mod connector;
pub mod error;
pub mod runtime;

pub use commands::Command;
pub use config::ClientConfig;
pub use connector::{Connector, TcpConnector};
pub use error::ClientError;
pub use runtime::{ClientHandle, ReconnectingClient};
