//! Server error types.

use std::{io, net::SocketAddr};

use rebound_core::ChaosConfigError;
use thiserror::Error;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: io::Error,
    },

    /// Listener failed with an error that is not per-connection
    #[error("accept loop failed: {0}")]
    Accept(#[source] io::Error),

    /// Chaos parameters out of range
    #[error("invalid chaos configuration: {0}")]
    Chaos(#[from] ChaosConfigError),

    /// Any other invalid setting
    #[error("invalid configuration: {0}")]
    Config(String),
}
