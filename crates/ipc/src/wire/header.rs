//! Message header layout.

use crate::error::ProtocolError;

use bytes::{Buf, BufMut};

/// Correlation id assigned to every outbound message.
pub type MessageId = u32;

/// Identifies a protocol (a group of event and request types).
pub type ProtocolId = u8;

/// Identifies an action within a protocol.
pub type ActionId = u8;

const HEADER_LEN: u32 = 16;

/// Header size in bytes (id + flags + length + protocol + action + reserved).
pub const HEADER_SIZE: usize = HEADER_LEN as usize;

const KIND_MASK: u32 = 0x0000_000F;
const PARAM_IN_SHIFT: u32 = 8;
const PARAM_OUT_SHIFT: u32 = 16;
const RESERVED_MASK: u32 = 0xFF00_00F0;

/// The four message kinds carried in the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Request that expects a response.
    SyncRequest = 0x01,
    /// Fire-and-forget request.
    AsyncRequest = 0x02,
    /// Unsolicited notification from the peer.
    Event = 0x03,
    /// Reply to a synchronous request.
    Response = 0x04,
}

impl MessageKind {
    /// Whether this kind is sent by a caller to invoke a remote operation.
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(self, Self::SyncRequest | Self::AsyncRequest)
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SyncRequest),
            0x02 => Ok(Self::AsyncRequest),
            0x03 => Ok(Self::Event),
            0x04 => Ok(Self::Response),
            _ => Err(ProtocolError::UnknownKind(value)),
        }
    }
}

/// Fixed-size message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message id, assigned by the client on invoke.
    pub id: MessageId,
    /// Message kind.
    pub kind: MessageKind,
    /// Number of input parameters.
    pub param_in: u8,
    /// Number of output parameters.
    pub param_out: u8,
    /// Total serialized length, header included.
    pub length: u32,
    /// Protocol id.
    pub protocol: ProtocolId,
    /// Action id within the protocol.
    pub action: ActionId,
}

impl MessageHeader {
    /// Header for a message without parameters.
    #[must_use]
    pub const fn new(kind: MessageKind, protocol: ProtocolId, action: ActionId) -> Self {
        Self {
            id: 0,
            kind,
            param_in: 0,
            param_out: 0,
            length: HEADER_LEN,
            protocol,
            action,
        }
    }

    /// Packed flags word: kind, input count and output count.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        (self.kind as u32)
            | ((self.param_in as u32) << PARAM_IN_SHIFT)
            | ((self.param_out as u32) << PARAM_OUT_SHIFT)
    }

    /// Total parameter count.
    #[must_use]
    pub const fn param_count(&self) -> usize {
        self.param_in as usize + self.param_out as usize
    }

    /// Write the header.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.flags());
        buf.put_u32_le(self.length);
        buf.put_u8(self.protocol);
        buf.put_u8(self.action);
        buf.put_u16_le(0);
    }

    /// Read a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than [`HEADER_SIZE`] bytes are present or the
    /// flags are invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = bytes.get(..HEADER_SIZE).ok_or(ProtocolError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;

        let id = buf.get_u32_le();
        let flags = buf.get_u32_le();
        let length = buf.get_u32_le();
        let protocol = buf.get_u8();
        let action = buf.get_u8();

        if flags & RESERVED_MASK != 0 {
            return Err(ProtocolError::ReservedFlags(flags));
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = Self {
            id,
            kind: MessageKind::try_from(flags & KIND_MASK)?,
            param_in: (flags >> PARAM_IN_SHIFT) as u8,
            param_out: (flags >> PARAM_OUT_SHIFT) as u8,
            length,
            protocol,
            action,
        };

        if (header.length as usize) < HEADER_SIZE {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                actual: HEADER_SIZE,
            });
        }

        Ok(header)
    }
}

/// Total message length declared by the header at the start of `bytes`.
///
/// Used by stream links to frame messages.
///
/// # Errors
///
/// Returns an error if the header is incomplete or invalid.
pub fn frame_length(bytes: &[u8]) -> Result<usize, ProtocolError> {
    MessageHeader::decode(bytes).map(|header| header.length as usize)
}
