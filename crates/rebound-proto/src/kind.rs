//! Logical message kinds carried in the `type` field.

use std::{fmt, str::FromStr};

use crate::errors::UnknownKind;

/// Kind of a logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Server → client, first frame of every connection, carries `serverId`
    ServerInfo,
    /// Client → server, carries `content`
    Message,
    /// Server → client, echoes `content` prefixed with the session identifier
    Response,
    /// Server → client, carries a failure description
    Error,
    /// Server → client, broadcast before the server terminates
    Shutdown,
    /// Server → client, sent right before a chaos-induced disconnect
    Chaos,
}

impl MessageKind {
    /// Wire spelling of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerInfo => "server_info",
            Self::Message => "message",
            Self::Response => "response",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
            Self::Chaos => "chaos",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server_info" => Ok(Self::ServerInfo),
            "message" => Ok(Self::Message),
            "response" => Ok(Self::Response),
            "error" => Ok(Self::Error),
            "shutdown" => Ok(Self::Shutdown),
            "chaos" => Ok(Self::Chaos),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}
