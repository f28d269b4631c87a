//! Pending-call table: completion state of in-flight synchronous requests.

use crate::error::ProtocolError;
use crate::wire::MessageId;

use bytes::BytesMut;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Lifecycle of a synchronous call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    /// Registered, not yet handed to the link.
    Created,
    /// Sent; no response yet.
    AwaitingResponse,
    /// Response installed.
    Completed,
    /// Send failed or the response could not be stored.
    Error,
}

impl CallStatus {
    /// Whether the call will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Completion state of one synchronous call, stored in a link-provided buffer.
#[derive(Debug)]
pub(crate) struct CompletionDescriptor {
    status: CallStatus,
    capacity: usize,
    buffer: BytesMut,
}

impl CompletionDescriptor {
    pub(crate) fn new(mut buffer: BytesMut, capacity: usize) -> Self {
        buffer.clear();
        Self {
            status: CallStatus::Created,
            capacity,
            buffer,
        }
    }

    pub(crate) const fn status(&self) -> CallStatus {
        self.status
    }

    /// Record the outcome of the send. A response that raced ahead of the
    /// sender is never overwritten.
    pub(crate) const fn mark_sent(&mut self, delivered: bool) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if delivered {
            CallStatus::AwaitingResponse
        } else {
            CallStatus::Error
        };
    }

    /// Copy a raw response into the buffer and complete the call.
    pub(crate) fn install(&mut self, raw: &[u8]) -> Result<(), ProtocolError> {
        if raw.len() > self.capacity {
            self.status = CallStatus::Error;
            return Err(ProtocolError::MessageTooLarge {
                size: raw.len(),
                max: self.capacity,
            });
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(raw);
        self.status = CallStatus::Completed;
        Ok(())
    }

    /// Raw response bytes.
    pub(crate) fn response(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn into_buffer(self) -> BytesMut {
        self.buffer
    }
}

/// Descriptors keyed by message id.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<MessageId, CompletionDescriptor>,
}

impl PendingCalls {
    /// Register a descriptor. Hands it back if the id is already in use, which
    /// can only happen after the id counter wrapped onto an unconsumed call.
    pub(crate) fn insert(
        &mut self,
        id: MessageId,
        descriptor: CompletionDescriptor,
    ) -> Result<(), CompletionDescriptor> {
        match self.calls.entry(id) {
            Entry::Occupied(_) => Err(descriptor),
            Entry::Vacant(entry) => {
                entry.insert(descriptor);
                Ok(())
            }
        }
    }

    pub(crate) fn status(&self, id: MessageId) -> Option<CallStatus> {
        self.calls.get(&id).map(CompletionDescriptor::status)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut CompletionDescriptor> {
        self.calls.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: MessageId) -> Option<CompletionDescriptor> {
        self.calls.remove(&id)
    }

    /// Whether a wait on `id` would still block.
    pub(crate) fn is_outstanding(&self, id: MessageId) -> bool {
        self.status(id).is_some_and(|status| !status.is_terminal())
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (MessageId, CompletionDescriptor)> + '_ {
        self.calls.drain()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn descriptor(capacity: usize) -> CompletionDescriptor {
        CompletionDescriptor::new(BytesMut::with_capacity(capacity), capacity)
    }

    #[test]
    fn test_send_outcome() {
        let mut sent = descriptor(32);
        assert_eq!(sent.status(), CallStatus::Created);
        sent.mark_sent(true);
        assert_eq!(sent.status(), CallStatus::AwaitingResponse);

        let mut failed = descriptor(32);
        failed.mark_sent(false);
        assert_eq!(failed.status(), CallStatus::Error);
    }

    #[test]
    fn test_response_before_send_outcome_is_kept() {
        let mut raced = descriptor(32);
        raced.install(&[1, 2, 3]).unwrap();
        raced.mark_sent(true);

        assert_eq!(raced.status(), CallStatus::Completed);
        assert_eq!(raced.response(), &[1, 2, 3]);
    }

    #[test]
    fn test_oversized_response() {
        let mut small = descriptor(4);
        assert_matches!(
            small.install(&[0u8; 5]),
            Err(ProtocolError::MessageTooLarge { size: 5, max: 4 })
        );
        assert_eq!(small.status(), CallStatus::Error);
    }

    #[test]
    fn test_table() {
        let mut table = PendingCalls::default();
        table.insert(1, descriptor(16)).unwrap();
        assert!(table.insert(1, descriptor(16)).is_err());

        assert!(table.is_outstanding(1));
        assert!(!table.is_outstanding(2));

        table.get_mut(1).unwrap().mark_sent(false);
        assert!(!table.is_outstanding(1));

        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert_eq!(table.len(), 0);
    }
}
