//! Rebound WebSocket server
//!
//! Runtime around the pure [`rebound_core::ServerConnection`] state machine:
//! accepts WebSocket connections on a fixed path, announces the process
//! session, answers messages, injects chaos, and on shutdown notifies every
//! live connection before releasing the listener.
//!
//! # Components
//!
//! - [`Server`]: Accept loop and shutdown coordination
//! - [`ConnectionRegistry`]: Live connection handles keyed by id
//! - [`ShutdownTrigger`]: Once-only shutdown from signals or faults
//! - [`ServerConfig`]: Startup configuration

mod connection;

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ServerError;
pub use registry::{ConnectionCommand, ConnectionHandle, ConnectionRegistry, Registration};
pub use server::{Server, ShutdownReport};
pub use shutdown::{ShutdownReason, ShutdownTrigger, wait_for_signal};
