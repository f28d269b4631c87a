//! Parameter descriptors.

use crate::error::ProtocolError;

use bytes::{Buf, BufMut, Bytes};

/// Size of one encoded parameter descriptor.
pub const PARAM_SIZE: usize = 16;

const TAG_VALUE: u8 = 0x01;
const TAG_BUFFER: u8 = 0x02;
const TAG_BUFFER_SPACE: u8 = 0x03;

/// Width of an inline value parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Width {
    /// 1 byte.
    W1 = 1,
    /// 2 bytes.
    W2 = 2,
    /// 4 bytes.
    W4 = 4,
    /// 8 bytes.
    W8 = 8,
}

impl Width {
    /// Number of bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Mask that truncates a value to this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::W1 => 0xFF,
            Self::W2 => 0xFFFF,
            Self::W4 => 0xFFFF_FFFF,
            Self::W8 => u64::MAX,
        }
    }
}

impl TryFrom<u32> for Width {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::W1),
            2 => Ok(Self::W2),
            4 => Ok(Self::W4),
            8 => Ok(Self::W8),
            _ => Err(ProtocolError::InvalidWidth(value)),
        }
    }
}

/// A single message parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// Inline value of up to 8 bytes.
    Value {
        /// The value, already truncated to `width`.
        value: u64,
        /// Declared width.
        width: Width,
    },
    /// Byte buffer carried in the trailing payload region.
    Buffer(Bytes),
    /// Output buffer declared by a request: capacity the response may fill.
    /// Carries no payload.
    BufferSpace(u32),
}

impl Param {
    /// Value parameter, truncated to `width`.
    #[must_use]
    pub const fn value(value: u64, width: Width) -> Self {
        Self::Value {
            value: value & width.mask(),
            width,
        }
    }

    /// 1-byte value.
    #[must_use]
    pub const fn u8(value: u8) -> Self {
        Self::value(value as u64, Width::W1)
    }

    /// 2-byte value.
    #[must_use]
    pub const fn u16(value: u16) -> Self {
        Self::value(value as u64, Width::W2)
    }

    /// 4-byte value.
    #[must_use]
    pub const fn u32(value: u32) -> Self {
        Self::value(value as u64, Width::W4)
    }

    /// 8-byte value.
    #[must_use]
    pub const fn u64(value: u64) -> Self {
        Self::value(value, Width::W8)
    }

    /// Buffer parameter.
    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Self::Buffer(bytes.into())
    }

    /// Output buffer declaration of `len` bytes.
    #[must_use]
    pub const fn buffer_space(len: u32) -> Self {
        Self::BufferSpace(len)
    }

    /// Inline value, if this is a value parameter.
    #[must_use]
    pub const fn as_value(&self) -> Option<u64> {
        match self {
            Self::Value { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Payload, if this is a buffer parameter.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Bytes this parameter adds to the trailing payload region.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Buffer(bytes) => bytes.len(),
            Self::Value { .. } | Self::BufferSpace(_) => 0,
        }
    }

    /// Payload bytes a response needs for this parameter when it is an output.
    #[must_use]
    pub fn reserved_len(&self) -> usize {
        match self {
            Self::Value { .. } => 0,
            Self::Buffer(bytes) => bytes.len(),
            Self::BufferSpace(len) => *len as usize,
        }
    }

    /// Write the descriptor. Payload bytes are written separately.
    pub(crate) fn encode_descriptor<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Value { value, width } => {
                buf.put_u8(TAG_VALUE);
                buf.put_u8(*width as u8);
                buf.put_u16_le(0);
                buf.put_u32_le(*width as u32);
                buf.put_u64_le(*value);
            }
            Self::Buffer(bytes) => {
                buf.put_u8(TAG_BUFFER);
                buf.put_u8(0);
                buf.put_u16_le(0);
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u32_le(bytes.len() as u32);
                buf.put_u64_le(0);
            }
            Self::BufferSpace(len) => {
                buf.put_u8(TAG_BUFFER_SPACE);
                buf.put_u8(0);
                buf.put_u16_le(0);
                buf.put_u32_le(*len);
                buf.put_u64_le(0);
            }
        }
    }
}

/// Decoded descriptor; buffer payloads are attached once the trailing region is read.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Descriptor {
    Value { value: u64, width: Width },
    Buffer { len: usize },
    BufferSpace { len: u32 },
}

impl Descriptor {
    pub(crate) fn decode<B: Buf>(buf: &mut B, index: usize) -> Result<Self, ProtocolError> {
        let tag = buf.get_u8();
        let width = buf.get_u8();
        let _reserved = buf.get_u16_le();
        let length = buf.get_u32_le();
        let value = buf.get_u64_le();

        match tag {
            TAG_VALUE => {
                let width = Width::try_from(u32::from(width))?;
                if length as usize != width.bytes() {
                    return Err(ProtocolError::InvalidParam {
                        index,
                        reason: "value length disagrees with width",
                    });
                }
                Ok(Self::Value {
                    value: value & width.mask(),
                    width,
                })
            }
            TAG_BUFFER => Ok(Self::Buffer {
                len: length as usize,
            }),
            TAG_BUFFER_SPACE => Ok(Self::BufferSpace { len: length }),
            _ => Err(ProtocolError::UnknownParamTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_truncation() {
        assert_eq!(Param::value(0x1_2345, Width::W2).as_value(), Some(0x2345));
        assert_eq!(
            Param::value(0xDEAD_BEEF_CAFE, Width::W4).as_value(),
            Some(0xBEEF_CAFE)
        );
        assert_eq!(Param::u64(u64::MAX).as_value(), Some(u64::MAX));
    }

    #[test]
    fn test_descriptor_layout() {
        let mut buf = Vec::new();
        Param::u16(0xBEEF).encode_descriptor(&mut buf);
        assert_eq!(
            buf,
            vec![
                0x01, 0x02, 0x00, 0x00, // tag, width, reserved
                0x02, 0x00, 0x00, 0x00, // length
                0xEF, 0xBE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // value
            ]
        );

        let mut buf = Vec::new();
        Param::buffer_space(300).encode_descriptor(&mut buf);
        assert_eq!(buf.len(), PARAM_SIZE);
        assert_eq!(buf[0], TAG_BUFFER_SPACE);
        assert_eq!(&buf[4..8], &300u32.to_le_bytes());
    }

    #[test]
    fn test_reserved_len() {
        assert_eq!(Param::u32(5).reserved_len(), 0);
        assert_eq!(Param::buffer(vec![0u8; 12]).reserved_len(), 12);
        assert_eq!(Param::buffer_space(64).reserved_len(), 64);
    }

    #[test]
    fn test_invalid_width() {
        let mut buf = Vec::new();
        Param::u32(1).encode_descriptor(&mut buf);
        buf[1] = 3;
        assert!(Descriptor::decode(&mut &buf[..], 0).is_err());
    }
}
