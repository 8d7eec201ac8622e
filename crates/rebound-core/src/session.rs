//! Server session identity.
//!
//! Each server process draws one [`SessionId`] at startup and announces it as
//! the first frame of every connection. Clients keep a [`SessionTracker`] to
//! tell a fresh server run apart from a reconnect to the instance they were
//! already talking to.

use std::fmt;

use uuid::Uuid;

use crate::env::Environment;

/// Identifier of one server process lifetime.
///
/// Generated once from the environment's RNG and never mutated, so it can be
/// shared by every connection without synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Draw a new random (version 4) identifier.
    pub fn generate(env: &impl Environment) -> Self {
        let mut bytes = [0u8; 16];
        env.random_bytes(&mut bytes);
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Outcome of observing a `server_info` announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDecision {
    /// First connection, or a different server run than last time.
    New,
    /// Same server run as the preceding connection attempt.
    Duplicate,
}

/// Remembers the session announced on the preceding connection attempt.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    last_server_id: Option<String>,
}

impl SessionTracker {
    /// Tracker that has seen no session yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `server_id` with the previous announcement and remember it.
    ///
    /// The comparison and the update read the same current value, so two
    /// consecutive announcements of one identifier always yield `Duplicate`
    /// for the second, however many times it repeats.
    pub fn observe(&mut self, server_id: &str) -> SessionDecision {
        if self.last_server_id.as_deref() == Some(server_id) {
            return SessionDecision::Duplicate;
        }

        self.last_server_id = Some(server_id.to_string());
        SessionDecision::New
    }

    /// Identifier remembered from the last accepted session.
    pub fn last_server_id(&self) -> Option<&str> {
        self.last_server_id.as_deref()
    }
}
