//! Message envelope and codec.

use super::header::{ActionId, HEADER_SIZE, MessageHeader, MessageKind, ProtocolId};
use super::param::{Descriptor, PARAM_SIZE, Param};
use crate::error::ProtocolError;

use bytes::{Bytes, BytesMut};

/// A message as exchanged over a link: header followed by its parameters.
///
/// Parameters are ordered inputs first, then outputs. The builder methods keep
/// `header.param_in`, `header.param_out` and `header.length` in step with the
/// parameter list; code that edits the fields directly should call
/// [`Message::validate`] afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header.
    pub header: MessageHeader,
    /// Inputs followed by outputs.
    pub params: Vec<Param>,
}

impl Message {
    /// Empty message of the given kind.
    #[must_use]
    pub const fn new(kind: MessageKind, protocol: ProtocolId, action: ActionId) -> Self {
        Self {
            header: MessageHeader::new(kind, protocol, action),
            params: Vec::new(),
        }
    }

    /// Request that expects a response.
    #[must_use]
    pub const fn sync_request(protocol: ProtocolId, action: ActionId) -> Self {
        Self::new(MessageKind::SyncRequest, protocol, action)
    }

    /// Fire-and-forget request.
    #[must_use]
    pub const fn async_request(protocol: ProtocolId, action: ActionId) -> Self {
        Self::new(MessageKind::AsyncRequest, protocol, action)
    }

    /// Event notification.
    #[must_use]
    pub const fn event(protocol: ProtocolId, action: ActionId) -> Self {
        Self::new(MessageKind::Event, protocol, action)
    }

    /// Response correlated with `request`.
    #[must_use]
    pub const fn response_to(request: &Self) -> Self {
        let mut response = Self::new(
            MessageKind::Response,
            request.header.protocol,
            request.header.action,
        );
        response.header.id = request.header.id;
        response
    }

    /// Append an input parameter.
    #[must_use]
    pub fn with_input(mut self, param: Param) -> Self {
        let at = (self.header.param_in as usize).min(self.params.len());
        self.params.insert(at, param);
        self.header.param_in = self.header.param_in.saturating_add(1);
        self.refresh_length();
        self
    }

    /// Append an output parameter.
    ///
    /// Requests declare outputs with [`Param::value`] or [`Param::buffer_space`];
    /// responses carry the actual results here.
    #[must_use]
    pub fn with_output(mut self, param: Param) -> Self {
        self.params.push(param);
        self.header.param_out = self.header.param_out.saturating_add(1);
        self.refresh_length();
        self
    }

    /// Message kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.header.kind
    }

    /// Input parameters.
    #[must_use]
    pub fn inputs(&self) -> &[Param] {
        let end = (self.header.param_in as usize).min(self.params.len());
        &self.params[..end]
    }

    /// Output parameters.
    #[must_use]
    pub fn outputs(&self) -> &[Param] {
        let start = (self.header.param_in as usize).min(self.params.len());
        &self.params[start..]
    }

    /// Serialized length of the message as it stands.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self.params.len() * PARAM_SIZE
            + self.params.iter().map(Param::payload_len).sum::<usize>()
    }

    /// Bytes needed to hold the response to this request: header, one
    /// descriptor per output and the declared output buffer capacity.
    #[must_use]
    pub fn completion_size(&self) -> usize {
        HEADER_SIZE
            + self.header.param_out as usize * PARAM_SIZE
            + self.outputs().iter().map(Param::reserved_len).sum::<usize>()
    }

    fn refresh_length(&mut self) {
        self.header.length = u32::try_from(self.encoded_len()).unwrap_or(u32::MAX);
    }

    /// Check the header against the parameter list.
    ///
    /// # Errors
    ///
    /// Returns an error if counts or length disagree, or a parameter is not
    /// allowed where it appears.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let declared = self.header.param_count();
        if declared != self.params.len() {
            return Err(ProtocolError::ParamCountMismatch {
                declared,
                actual: self.params.len(),
            });
        }

        for (index, param) in self.params.iter().enumerate() {
            match param {
                Param::Buffer(bytes) if u32::try_from(bytes.len()).is_err() => {
                    return Err(ProtocolError::MessageTooLarge {
                        size: bytes.len(),
                        max: u32::MAX as usize,
                    });
                }
                Param::BufferSpace(_)
                    if !self.header.kind.is_request()
                        || index < self.header.param_in as usize =>
                {
                    return Err(ProtocolError::InvalidParam {
                        index,
                        reason: "buffer space is only allowed among request outputs",
                    });
                }
                _ => {}
            }
        }

        let actual = self.encoded_len();
        if u32::try_from(actual).is_err() {
            return Err(ProtocolError::MessageTooLarge {
                size: actual,
                max: u32::MAX as usize,
            });
        }
        if self.header.length as usize != actual {
            return Err(ProtocolError::LengthMismatch {
                declared: self.header.length as usize,
                actual,
            });
        }

        Ok(())
    }

    /// Encode into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not validate.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        self.validate()?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        Ok(buf.freeze())
    }

    /// Append the encoding to `buf` without validating.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.header.encode(buf);
        for param in &self.params {
            param.encode_descriptor(buf);
        }
        for param in &self.params {
            if let Param::Buffer(bytes) = param {
                buf.extend_from_slice(bytes);
            }
        }
    }

    /// Decode one message from the start of `bytes`. Bytes beyond the declared
    /// length are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not hold a well-formed message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(bytes)?;
        let length = header.length as usize;
        let frame = bytes.get(..length).ok_or(ProtocolError::Truncated {
            needed: length,
            available: bytes.len(),
        })?;

        let count = header.param_count();
        let descriptors_end = HEADER_SIZE + count * PARAM_SIZE;
        let mut descriptor_bytes =
            frame
                .get(HEADER_SIZE..descriptors_end)
                .ok_or(ProtocolError::Truncated {
                    needed: descriptors_end,
                    available: length,
                })?;

        let mut descriptors = Vec::with_capacity(count);
        for index in 0..count {
            descriptors.push(Descriptor::decode(&mut descriptor_bytes, index)?);
        }

        let mut offset = descriptors_end;
        let mut params = Vec::with_capacity(count);
        for descriptor in descriptors {
            params.push(match descriptor {
                Descriptor::Value { value, width } => Param::Value { value, width },
                Descriptor::BufferSpace { len } => Param::BufferSpace(len),
                Descriptor::Buffer { len } => {
                    let end = offset + len;
                    let payload = frame.get(offset..end).ok_or(ProtocolError::Truncated {
                        needed: end,
                        available: length,
                    })?;
                    offset = end;
                    Param::Buffer(Bytes::copy_from_slice(payload))
                }
            });
        }

        if offset != length {
            return Err(ProtocolError::LengthMismatch {
                declared: length,
                actual: offset,
            });
        }

        let message = Self { header, params };
        message.validate()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Width;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn sample_request() -> Message {
        Message::sync_request(3, 7)
            .with_input(Param::u32(42))
            .with_input(Param::buffer(&b"path/to/file"[..]))
            .with_output(Param::value(0, Width::W4))
            .with_output(Param::buffer_space(16))
    }

    #[test]
    fn test_builder_tracks_header() {
        let message = sample_request();

        assert_eq!(message.header.param_in, 2);
        assert_eq!(message.header.param_out, 2);
        assert_eq!(message.inputs().len(), 2);
        assert_eq!(message.outputs().len(), 2);
        assert_eq!(
            message.header.length as usize,
            HEADER_SIZE + 4 * PARAM_SIZE + 12
        );
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_inputs_added_after_outputs_stay_in_front() {
        let message = Message::sync_request(1, 1)
            .with_output(Param::buffer_space(8))
            .with_input(Param::u8(1));

        assert_eq!(message.inputs(), &[Param::u8(1)]);
        assert_eq!(message.outputs(), &[Param::buffer_space(8)]);
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_completion_size() {
        let message = sample_request();
        assert_eq!(message.completion_size(), HEADER_SIZE + 2 * PARAM_SIZE + 16);
    }

    #[test]
    fn test_encode_decode() {
        let message = sample_request();
        let encoded = message.encode().unwrap();

        assert_eq!(encoded.len(), message.header.length as usize);
        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let message = Message::event(1, 2).with_input(Param::buffer(vec![9u8; 4]));
        let mut encoded = message.encode().unwrap().to_vec();
        encoded.extend_from_slice(&[0xAA; 8]);

        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = sample_request().encode().unwrap();
        let result = Message::decode(&encoded[..encoded.len() - 1]);

        assert_matches!(result, Err(ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_count_mismatch() {
        let mut message = sample_request();
        message.header.param_out = 5;

        assert_matches!(
            message.validate(),
            Err(ProtocolError::ParamCountMismatch {
                declared: 7,
                actual: 4
            })
        );
        assert!(message.encode().is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let mut message = sample_request();
        message.header.length += 1;

        assert_matches!(
            message.validate(),
            Err(ProtocolError::LengthMismatch { .. })
        );
    }

    #[test]
    fn test_buffer_space_rejected_in_response() {
        let request = sample_request();
        let response = Message::response_to(&request).with_output(Param::buffer_space(4));

        assert_matches!(
            response.validate(),
            Err(ProtocolError::InvalidParam { index: 0, .. })
        );
    }

    #[test]
    fn test_response_to_copies_correlation() {
        let mut request = sample_request();
        request.header.id = 99;
        let response = Message::response_to(&request);

        assert_eq!(response.header.id, 99);
        assert_eq!(response.kind(), MessageKind::Response);
        assert_eq!(response.header.protocol, 3);
        assert_eq!(response.header.action, 7);
    }

    fn arb_param() -> impl Strategy<Value = Param> {
        prop_oneof![
            any::<u8>().prop_map(Param::u8),
            any::<u16>().prop_map(Param::u16),
            any::<u32>().prop_map(Param::u32),
            any::<u64>().prop_map(Param::u64),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| Param::buffer(bytes)),
        ]
    }

    proptest! {
        #[test]
        fn prop_event_survives_codec(
            id in any::<u32>(),
            protocol in any::<u8>(),
            action in any::<u8>(),
            params in proptest::collection::vec(arb_param(), 0..8),
        ) {
            let mut message = Message::event(protocol, action);
            for param in params {
                message = message.with_input(param);
            }
            message.header.id = id;

            let encoded = message.encode().unwrap();
            prop_assert_eq!(encoded.len(), message.encoded_len());
            prop_assert_eq!(Message::decode(&encoded).unwrap(), message);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = Message::decode(&bytes);
        }
    }
}
