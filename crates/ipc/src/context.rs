use crate::wire::{MessageId, MessageKind};

/// Caller-owned correlation token for one invocation.
///
/// Create one per call, pass it to [`Client::invoke`](crate::Client::invoke),
/// then use it to await and extract the result. The completion state itself
/// stays with the client until [`Client::status`](crate::Client::status)
/// consumes it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageContext {
    binding: Option<(MessageId, MessageKind)>,
}

impl MessageContext {
    /// Unbound context.
    #[must_use]
    pub const fn new() -> Self {
        Self { binding: None }
    }

    /// Id assigned by the last invoke, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.binding.map(|(id, _)| id)
    }

    /// Kind of the invoked message, if any.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        self.binding.map(|(_, kind)| kind)
    }

    pub(crate) fn bind(&mut self, id: MessageId, kind: MessageKind) {
        self.binding = Some((id, kind));
    }
}
