//! Deterministic simulation harness for Rebound.
//!
//! Turmoil-based implementations of the Environment, Listener and Connector
//! seams for reproducible testing of reconnect, restart, chaos and shutdown,
//! plus a reference model of the client lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use model::{ClientModel, Operation, Outcome};
pub use scenario::{ServerHost, ServerStats};
pub use sim_env::SimEnv;
pub use sim_transport::{SimConnector, SimListener};
