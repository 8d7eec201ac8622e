//! Wire format for the Rebound messaging channel.
//!
//! A frame is a flat sequence of tag-length-value chunks:
//!
//! ```text
//! ┌─────────┬──────────────────────┬──────────────────────┐
//! │ tag (1) │ length (4, u32 BE)   │ value (length bytes) │ ...repeated
//! └─────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! Three tags are defined ([`Tag`]): the message kind, the text content and the
//! server session identifier. Values are UTF-8. Chunks carry no padding or
//! separators, and a frame with no fields encodes to zero bytes.
//!
//! Decoding walks chunks from offset zero. Unknown tags are skipped using their
//! declared length so older peers can pass over fields added later. Any
//! structural violation fails the whole frame with
//! [`ProtocolError::MalformedFrame`]; no partially decoded frame is ever
//! returned.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod kind;
pub mod tag;

pub use errors::{Malformation, ProtocolError, Result, UnknownKind};
pub use frame::{DecodedFrame, Frame};
pub use kind::MessageKind;
pub use tag::{ChunkHeader, Tag};
