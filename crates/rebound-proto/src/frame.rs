//! Logical frames and their tag-length-value encoding.

use std::ops::Deref;

use bytes::Bytes;
use zerocopy::IntoBytes;

use crate::{
    MessageKind,
    errors::{Malformation, ProtocolError, Result},
    tag::{ChunkHeader, Tag},
};

/// A logical message.
///
/// Every field is optional and only present fields go on the wire. Encoding
/// always emits fields in [`Tag::ALL`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Message kind discriminator (`type` on the wire)
    pub kind: Option<String>,
    /// Payload text
    pub content: Option<String>,
    /// Server session identifier (`serverId` on the wire)
    pub server_id: Option<String>,
}

impl Frame {
    /// Frame with no fields. Encodes to zero bytes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the `type` field.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    /// Set the `content` field.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the `serverId` field.
    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// `server_info` announcing the session a connection belongs to.
    pub fn server_info(server_id: impl Into<String>) -> Self {
        Self::empty().with_kind(MessageKind::ServerInfo).with_server_id(server_id)
    }

    /// Client `message` carrying user content.
    pub fn message(content: impl Into<String>) -> Self {
        Self::empty().with_kind(MessageKind::Message).with_content(content)
    }

    /// Server `response` to a client message.
    pub fn response(server_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::empty()
            .with_kind(MessageKind::Response)
            .with_content(content)
            .with_server_id(server_id)
    }

    /// `error` describing a failed message.
    pub fn error(description: impl Into<String>) -> Self {
        Self::empty().with_kind(MessageKind::Error).with_content(description)
    }

    /// `shutdown` notice broadcast before the server exits.
    pub fn shutdown(server_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::empty()
            .with_kind(MessageKind::Shutdown)
            .with_content(content)
            .with_server_id(server_id)
    }

    /// `chaos` notice sent right before a forced disconnect.
    pub fn chaos(content: impl Into<String>) -> Self {
        Self::empty().with_kind(MessageKind::Chaos).with_content(content)
    }

    /// Parsed message kind, if `type` is present and known.
    pub fn message_kind(&self) -> Option<MessageKind> {
        self.kind.as_deref().and_then(|kind| kind.parse().ok())
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.content.is_none() && self.server_id.is_none()
    }

    /// Exact number of bytes [`Frame::encode`] will write.
    pub fn encoded_len(&self) -> usize {
        self.fields().filter_map(|(_, value)| value).map(|v| ChunkHeader::SIZE + v.len()).sum()
    }

    /// Append the encoded frame to `dst`.
    ///
    /// All lengths are checked before anything is written, so `dst` is left
    /// untouched on error.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        let mut chunks = Vec::with_capacity(Tag::ALL.len());
        for (tag, value) in self.fields() {
            let Some(value) = value else { continue };
            let length = u32::try_from(value.len())
                .map_err(|_| ProtocolError::FieldTooLarge { field: tag.field_name(), len: value.len() })?;
            chunks.push((ChunkHeader::new(tag.to_u8(), length), value));
        }

        dst.reserve(self.encoded_len());
        for (header, value) in chunks {
            dst.extend_from_slice(header.as_bytes());
            dst.extend_from_slice(value.as_bytes());
        }
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode a complete frame.
    ///
    /// A repeated known tag overwrites the earlier value. Unknown tags are
    /// skipped without UTF-8 validation.
    pub fn decode(raw: &[u8]) -> Result<DecodedFrame> {
        let mut frame = Self::empty();
        let mut offset = 0;

        while offset < raw.len() {
            let rest = &raw[offset..];
            let Some((header, tail)) = ChunkHeader::split_prefix(rest) else {
                return Err(malformed(
                    offset,
                    Malformation::TruncatedHeader { needed: ChunkHeader::SIZE, available: rest.len() },
                ));
            };

            let declared = header.length();
            let Some(value) = usize::try_from(declared).ok().and_then(|len| tail.get(..len)) else {
                return Err(malformed(
                    offset,
                    Malformation::TruncatedValue { declared, available: tail.len() },
                ));
            };

            if let Some(tag) = Tag::from_u8(header.tag()) {
                let text = std::str::from_utf8(value).map_err(|_| {
                    malformed(offset, Malformation::InvalidUtf8 { field: tag.field_name() })
                })?;
                *frame.slot_mut(tag) = Some(text.to_string());
            }

            offset += ChunkHeader::SIZE + value.len();
        }

        Ok(DecodedFrame { frame, raw: Bytes::copy_from_slice(raw) })
    }

    fn fields(&self) -> impl Iterator<Item = (Tag, Option<&String>)> {
        [
            (Tag::MessageType, self.kind.as_ref()),
            (Tag::Content, self.content.as_ref()),
            (Tag::ServerId, self.server_id.as_ref()),
        ]
        .into_iter()
    }

    fn slot_mut(&mut self, tag: Tag) -> &mut Option<String> {
        match tag {
            Tag::MessageType => &mut self.kind,
            Tag::Content => &mut self.content,
            Tag::ServerId => &mut self.server_id,
        }
    }
}

fn malformed(offset: usize, reason: Malformation) -> ProtocolError {
    ProtocolError::MalformedFrame { offset, reason }
}

/// A decoded frame together with the bytes it was decoded from.
///
/// The raw bytes are kept for diagnostic echo only; equality of the logical
/// message is [`Frame`] equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    frame: Frame,
    raw: Bytes,
}

impl DecodedFrame {
    /// The logical message.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Take the logical message, dropping the raw bytes.
    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Original wire bytes.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Original wire bytes as lowercase hex, for logging.
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

impl Deref for DecodedFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}
