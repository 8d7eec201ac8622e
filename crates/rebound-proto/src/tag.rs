//! Chunk tags and the fixed-size chunk header.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U32},
};

/// Field tag carried in the first byte of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tag {
    /// Message kind discriminator (`type`)
    MessageType = 1,
    /// Payload text (`content`)
    Content = 2,
    /// Server session identifier (`serverId`)
    ServerId = 3,
}

impl Tag {
    /// All known tags in encoding order.
    pub const ALL: [Self; 3] = [Self::MessageType, Self::Content, Self::ServerId];

    /// Map a raw tag byte to a known tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::MessageType),
            2 => Some(Self::Content),
            3 => Some(Self::ServerId),
            _ => None,
        }
    }

    /// Raw tag byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Field name used by peers for this tag.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::MessageType => "type",
            Self::Content => "content",
            Self::ServerId => "serverId",
        }
    }
}

/// Chunk header: one tag byte followed by a big-endian `u32` value length.
///
/// The layout is checked at compile time by `zerocopy`, so parsing is a cast
/// over the input slice.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    tag: u8,
    length: U32<BigEndian>,
}

const _: () = assert!(size_of::<ChunkHeader>() == ChunkHeader::SIZE);

impl ChunkHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 5;

    /// Build a header for a value of `length` bytes.
    pub fn new(tag: u8, length: u32) -> Self {
        Self { tag, length: U32::new(length) }
    }

    /// Raw tag byte (may be unknown).
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Declared value length.
    pub fn length(&self) -> u32 {
        self.length.get()
    }

    /// Split a header off the front of `bytes`.
    ///
    /// Returns `None` when fewer than [`Self::SIZE`] bytes are available.
    pub fn split_prefix(bytes: &[u8]) -> Option<(&Self, &[u8])> {
        Self::ref_from_prefix(bytes).ok()
    }
}
