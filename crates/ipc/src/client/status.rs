use super::Client;
use crate::context::MessageContext;
use crate::error::{Error, ProtocolError, Result};
use crate::pending::CallStatus;
use crate::wire::{Message, MessageId, Param, Width};

use tracing::{debug, instrument};

/// Caller-side slot receiving one output of a synchronous call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutParam {
    /// Receives an inline value truncated to `width`.
    Value {
        /// Width of the slot.
        width: Width,
        /// Extracted value.
        value: u64,
    },
    /// Receives up to `len` bytes of a returned buffer.
    Buffer {
        /// Capacity of the slot.
        len: usize,
        /// Extracted bytes.
        data: Vec<u8>,
    },
}

impl OutParam {
    /// Empty value slot.
    #[must_use]
    pub const fn value(width: Width) -> Self {
        Self::Value { width, value: 0 }
    }

    /// Empty buffer slot of `len` bytes.
    #[must_use]
    pub fn buffer(len: usize) -> Self {
        Self::Buffer {
            len,
            data: Vec::with_capacity(len),
        }
    }

    /// One empty slot per output declared by `request`.
    #[must_use]
    pub fn slots_for(request: &Message) -> Vec<Self> {
        request
            .outputs()
            .iter()
            .map(|param| match param {
                Param::Value { width, .. } => Self::value(*width),
                Param::Buffer(bytes) => Self::buffer(bytes.len()),
                Param::BufferSpace(len) => Self::buffer(*len as usize),
            })
            .collect()
    }

    /// Extracted value, if this is a value slot.
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Value { value, .. } => Some(*value),
            Self::Buffer { .. } => None,
        }
    }

    /// Extracted value, if this is a value slot holding a `u32`.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|value| u32::try_from(value).ok())
    }

    /// Extracted bytes, if this is a buffer slot.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer { data, .. } => Some(data.as_slice()),
            Self::Value { .. } => None,
        }
    }

    fn fill(&mut self, id: MessageId, index: usize, result: &Param) -> Result<()> {
        match (self, result) {
            (Self::Value { width, value }, Param::Value { value: stored, .. }) => {
                *value = stored & width.mask();
            }
            (Self::Buffer { len, data }, Param::Buffer(stored)) => {
                let take = (*len).min(stored.len());
                data.clear();
                data.extend_from_slice(&stored[..take]);
            }
            (Self::Value { .. }, _) => {
                return Err(ProtocolError::OutputMismatch {
                    id,
                    index,
                    reason: "expected a value",
                }
                .into());
            }
            (Self::Buffer { .. }, _) => {
                return Err(ProtocolError::OutputMismatch {
                    id,
                    index,
                    reason: "expected a buffer",
                }
                .into());
            }
        }
        Ok(())
    }
}

impl Client {
    /// Query a call and, once it is terminal, extract its outputs into `out`.
    ///
    /// A terminal call is removed from the client and its descriptor buffer
    /// returned to the link, so the result can be extracted exactly once.
    /// Non-terminal calls are left untouched and `out` is not written.
    ///
    /// Output slots are filled in the order the request declared its
    /// outputs; `out` may be shorter than that list but not longer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `context` was never invoked.
    /// - [`Error::AlreadyConsumed`] if no call is tracked under its id.
    /// - [`Error::Protocol`] if the stored response does not match `out`.
    ///   The call is consumed regardless.
    /// - [`Error::ShuttingDown`] if the client is shut down.
    #[instrument(skip(self, context, out), fields(id = ?context.message_id()))]
    pub fn status(&self, context: &MessageContext, out: &mut [OutParam]) -> Result<CallStatus> {
        let id = context.message_id().ok_or_else(|| {
            Error::InvalidArgument("context has not been invoked".to_string())
        })?;

        let descriptor = {
            let mut state = self.lock_connected()?;
            let status = state
                .pending
                .status(id)
                .ok_or(Error::AlreadyConsumed(id))?;
            if !status.is_terminal() {
                return Ok(status);
            }
            state.pending.remove(id).ok_or(Error::AlreadyConsumed(id))?
        };

        let status = descriptor.status();
        let extracted = match status {
            CallStatus::Completed => unpack(id, descriptor.response(), out),
            _ => Ok(()),
        };
        self.link.free_buffer(descriptor.into_buffer());

        extracted?;
        debug!("Extracted {:?} call {}", status, id);
        Ok(status)
    }
}

fn unpack(id: MessageId, raw: &[u8], out: &mut [OutParam]) -> Result<()> {
    let response = Message::decode(raw)?;
    let results = response.outputs();

    for (index, slot) in out.iter_mut().enumerate() {
        let result = results.get(index).ok_or(ProtocolError::OutputMismatch {
            id,
            index,
            reason: "response holds fewer results than slots",
        })?;
        slot.fill(id, index, result)?;
    }

    Ok(())
}
