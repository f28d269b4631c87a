use super::Client;
use crate::context::MessageContext;
use crate::error::{Error, LinkError, Result};
use crate::pending::{CallStatus, CompletionDescriptor};
use crate::wire::{Message, MessageKind};

use tracing::{debug, instrument, warn};

impl Client {
    /// Send a message, assigning it the next message id.
    ///
    /// The id is written to `message.header.id` and bound to `context`. A
    /// synchronous request also gets a completion descriptor, sized for its
    /// declared outputs, which stays with the client until
    /// [`Client::status`] extracts it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the message is malformed or too large;
    ///   no id is consumed and no state changes.
    /// - [`Error::OutOfMemory`] if the link cannot provide a descriptor buffer.
    /// - [`Error::Link`] if the send fails. A synchronous call is then left in
    ///   [`CallStatus::Error`] and must still be extracted.
    #[instrument(
        skip(self, context, message),
        fields(protocol = message.header.protocol, action = message.header.action)
    )]
    pub fn invoke(&self, context: &mut MessageContext, message: &mut Message) -> Result<()> {
        self.state.lock().ensure_connected()?;
        self.check_outbound(message)?;

        let kind = message.kind();
        let id = self.next_message_id();
        message.header.id = id;
        context.bind(id, kind);

        let synchronous = kind == MessageKind::SyncRequest;
        if synchronous {
            self.register_call(message)?;
        }

        let sent = self.link.send(message, context);

        if synchronous {
            let mut state = self.state.lock();
            if let Some(descriptor) = state.pending.get_mut(id) {
                descriptor.mark_sent(sent.is_ok());
                if descriptor.status() == CallStatus::Error {
                    state.awaiters.mark(id);
                }
            }
        }

        match sent {
            Ok(()) => {
                debug!("Sent {:?} message {}", kind, id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send message {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    fn check_outbound(&self, message: &Message) -> Result<()> {
        message
            .validate()
            .map_err(|e| Error::InvalidArgument(format!("malformed message: {e}")))?;

        let max = self.config.max_message_size;
        let size = message.encoded_len();
        if size > max {
            return Err(Error::InvalidArgument(format!(
                "message of {size} bytes exceeds maximum of {max}"
            )));
        }

        if message.kind() == MessageKind::SyncRequest {
            let response = message.completion_size();
            if response > max {
                return Err(Error::InvalidArgument(format!(
                    "declared response of {response} bytes exceeds maximum of {max}"
                )));
            }
        }

        Ok(())
    }

    /// Obtain a descriptor buffer from the link and file it under the
    /// message's id.
    fn register_call(&self, message: &Message) -> Result<()> {
        let id = message.header.id;
        let size = message.completion_size();

        let buffer = self.link.get_buffer(size).map_err(|e| match e {
            LinkError::BufferLimit {
                requested,
                available,
            } => {
                warn!(
                    "No descriptor buffer for message {}: {} bytes requested, {} available",
                    id, requested, available
                );
                Error::OutOfMemory { requested }
            }
            other => other.into(),
        })?;

        let mut state = self.state.lock();
        if let Err(e) = state.ensure_connected() {
            drop(state);
            self.link.free_buffer(buffer);
            return Err(e);
        }

        if let Err(rejected) = state
            .pending
            .insert(id, CompletionDescriptor::new(buffer, size))
        {
            drop(state);
            self.link.free_buffer(rejected.into_buffer());
            return Err(Error::InvalidArgument(format!(
                "message id {id} still has an unextracted result"
            )));
        }

        Ok(())
    }
}
