//! Live connection tracking.
//!
//! Every connection task registers a [`ConnectionHandle`] after its WebSocket
//! handshake and holds the returned [`Registration`] until it exits, so the
//! registry always lists exactly the connections that still have a driver.
//! Shutdown [drains](ConnectionRegistry::drain) the registry: it snapshots
//! the handles and refuses later registrations, which makes late arrivals
//! shut themselves down instead of slipping past the broadcast.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rebound_core::ConnectionId;
use tokio::sync::{mpsc, oneshot};

/// Command delivered to a connection task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Send the shutdown notice and close. `ack` fires once the close has
    /// been attempted.
    Shutdown {
        /// Completion signal
        ack: oneshot::Sender<()>,
    },
}

/// Sending side of a connection task's command channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its task will poll.
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { id, commands }, rx)
    }

    /// Connection this handle addresses.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Ask the connection to shut down.
    ///
    /// The receiver resolves with `Ok` once the close was attempted, or with
    /// `Err` if the task exited first. Both mean the connection is done.
    pub fn request_shutdown(&self) -> oneshot::Receiver<()> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(ConnectionCommand::Shutdown { ack }).is_err() {
            tracing::debug!(connection = %self.id, "connection already gone");
        }
        done
    }
}

#[derive(Debug, Default)]
struct Inner {
    draining: bool,
    handles: HashMap<ConnectionId, ConnectionHandle>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    ///
    /// Returns `None` once the registry is draining; the caller must then
    /// shut the connection down itself.
    pub fn register(self: &Arc<Self>, handle: ConnectionHandle) -> Option<Registration> {
        let id = handle.id();
        let mut inner = self.lock();
        if inner.draining {
            return None;
        }
        inner.handles.insert(id, handle);
        Some(Registration { registry: Arc::clone(self), id })
    }

    /// Stop accepting registrations and return every live handle.
    ///
    /// Handles stay tracked until their tasks exit.
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.lock();
        inner.draining = true;
        let mut handles: Vec<_> = inner.handles.values().cloned().collect();
        handles.sort_by_key(ConnectionHandle::id);
        handles
    }

    /// True once [`drain`](Self::drain) has been called.
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    /// True when no connection is live.
    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }

    /// True while `id` is tracked.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().handles.contains_key(&id)
    }

    fn remove(&self, id: ConnectionId) {
        self.lock().handles.remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a connection registered; removes it on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    /// Registered connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
