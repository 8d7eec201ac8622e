//! Accept loop and shutdown coordination.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use rebound_core::{ChaosInjector, ConnectionId, Environment, Listener, SessionId};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    config::ServerConfig,
    connection::{self, ConnectionContext},
    error::ServerError,
    registry::{ConnectionHandle, ConnectionRegistry},
};

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Session that just ended
    pub session: SessionId,
    /// Connections that were sent the shutdown notice
    pub connections_notified: usize,
}

/// A WebSocket server bound to one listener.
///
/// The session id is drawn once at construction and announced to every
/// connection until the server is dropped.
pub struct Server<E: Environment, L: Listener> {
    config: Arc<ServerConfig>,
    env: E,
    listener: L,
    session: SessionId,
    injector: ChaosInjector,
    registry: Arc<ConnectionRegistry>,
}

impl<E: Environment, L: Listener> Server<E, L> {
    /// Build a server on an already bound listener.
    pub fn new(config: ServerConfig, env: E, listener: L) -> Result<Self, ServerError> {
        config.validate()?;
        let injector = ChaosInjector::new(config.chaos.clone())?;
        let session = SessionId::generate(&env);

        Ok(Self {
            config: Arc::new(config),
            env,
            listener,
            session,
            injector,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Session announced to clients.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` fires or the listener fails.
    ///
    /// Either way every live connection is sent the shutdown notice and
    /// closed before the listener is released.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ShutdownReport, ServerError> {
        info!(
            server_id = %self.session,
            addr = ?self.listener.local_addr().ok(),
            path = %self.config.path,
            chaos = self.injector.is_enabled(),
            "server listening"
        );

        let mut next_id = 0u64;
        let accepted = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        self.spawn_connection(ConnectionId::new(next_id), stream, peer);
                    },
                    Err(error) => match classify_accept_error(&error) {
                        AcceptFailure::PerConnection => {
                            warn!(%error, "accept failed for one connection");
                        },
                        AcceptFailure::Exhausted => {
                            warn!(%error, backoff = ?ACCEPT_BACKOFF, "out of descriptors, pausing accepts");
                            tokio::select! {
                                () = shutdown.cancelled() => break Ok(()),
                                () = self.env.sleep(ACCEPT_BACKOFF) => {},
                            }
                        },
                        AcceptFailure::Fatal => break Err(error),
                    },
                },
            }
        };

        if let Err(error) = &accepted {
            error!(%error, "listener failed, shutting down");
        }

        let connections_notified = self.broadcast_shutdown().await;
        drop(self.listener);
        info!(server_id = %self.session, connections_notified, "server stopped");

        accepted.map_err(ServerError::Accept)?;
        Ok(ShutdownReport { session: self.session, connections_notified })
    }

    fn spawn_connection(&self, id: ConnectionId, stream: L::Stream, peer: SocketAddr) {
        let ctx = ConnectionContext {
            id,
            session: self.session,
            env: self.env.clone(),
            injector: self.injector.clone(),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        };
        let span = info_span!("connection", connection = %id);
        tokio::spawn(connection::serve(stream, peer, ctx).instrument(span));
    }

    async fn broadcast_shutdown(&self) -> usize {
        let handles = self.registry.drain();
        info!(connections = handles.len(), "notifying connections of shutdown");

        let pending: Vec<_> = handles.iter().map(ConnectionHandle::request_shutdown).collect();
        // A dropped ack means the task already exited. Each connection acks
        // or gives up on its peer within one close grace.
        let bound = self.config.close_grace * 2;
        if tokio::time::timeout(bound, join_all(pending)).await.is_err() {
            warn!(?bound, "some connections did not acknowledge shutdown");
        }
        handles.len()
    }
}

/// Pause before accepting again after running out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Raw OS codes for descriptor exhaustion (`ENFILE`, `EMFILE`).
#[cfg(unix)]
const DESCRIPTORS_EXHAUSTED: &[i32] = &[23, 24];
/// Raw OS codes for descriptor exhaustion (`WSAEMFILE`).
#[cfg(windows)]
const DESCRIPTORS_EXHAUSTED: &[i32] = &[10024];
#[cfg(not(any(unix, windows)))]
const DESCRIPTORS_EXHAUSTED: &[i32] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Only the connection being accepted is affected
    PerConnection,
    /// Process or system is out of resources; retry after a pause
    Exhausted,
    /// Listener is unusable
    Fatal,
}

fn classify_accept_error(error: &io::Error) -> AcceptFailure {
    if error.raw_os_error().is_some_and(|code| DESCRIPTORS_EXHAUSTED.contains(&code)) {
        return AcceptFailure::Exhausted;
    }
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::PerConnection,
        io::ErrorKind::OutOfMemory => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}
