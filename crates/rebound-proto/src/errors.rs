//! Error types for frame encoding and decoding.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced by the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Structural violation found while decoding.
    ///
    /// `offset` is the position of the chunk that failed, counted from the
    /// start of the buffer.
    #[error("malformed frame at byte {offset}: {reason}")]
    MalformedFrame {
        /// Start of the offending chunk
        offset: usize,
        /// What was wrong with it
        reason: Malformation,
    },

    /// A field value does not fit the 4-byte length prefix.
    #[error("{field} value is {len} bytes, too long for a u32 length prefix")]
    FieldTooLarge {
        /// Wire name of the field
        field: &'static str,
        /// Byte length of the rejected value
        len: usize,
    },
}

impl ProtocolError {
    /// Whether this error came from decoding untrusted bytes.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }
}

/// Reason a frame failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Malformation {
    /// Fewer bytes remain than a chunk header needs.
    #[error("chunk header needs {needed} bytes, {available} available")]
    TruncatedHeader {
        /// Header size
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// The declared value length runs past the end of the buffer.
    #[error("chunk declares {declared} value bytes, {available} available")]
    TruncatedValue {
        /// Length from the chunk header
        declared: u32,
        /// Bytes left after the header
        available: usize,
    },

    /// A known field carried bytes that are not UTF-8.
    #[error("{field} value is not valid UTF-8")]
    InvalidUtf8 {
        /// Wire name of the field
        field: &'static str,
    },
}

/// A `type` value that names none of the known message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message kind {0:?}")]
pub struct UnknownKind(pub String);
