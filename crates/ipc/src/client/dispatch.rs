use super::Client;
use crate::error::{Error, HandlerError, LinkError, Result};
use crate::link::RecvMode;
use crate::pending::CallStatus;
use crate::wire::{ActionId, Message, MessageId, MessageKind, ProtocolId};

use bytes::BytesMut;
use tracing::{debug, error, info, instrument, trace, warn};

/// What the dispatch loop did with one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// A response completed the pending call with this id.
    Response(MessageId),
    /// An event was handed to a protocol action.
    Event {
        /// Protocol that handled the event.
        protocol: ProtocolId,
        /// Action that was invoked.
        action: ActionId,
    },
    /// The message had no taker and was discarded.
    Dropped(MessageId),
}

impl Client {
    /// Receive one message, blocking until it arrives, and route it.
    ///
    /// Responses complete their pending call and wake the awaiters it
    /// satisfies. Events go to the registered protocol's action handler.
    /// `buffer` is cleared first and holds the raw message afterwards.
    ///
    /// # Errors
    ///
    /// - [`Error::Link`] if the receive fails.
    /// - [`Error::Protocol`] if the message is malformed or a response does
    ///   not fit its descriptor. The loop can continue.
    /// - [`Error::Handler`] if no handler matches an event or the handler
    ///   fails. The loop can continue.
    /// - [`Error::ShuttingDown`] if the client is shut down.
    pub fn wait_message(&self, buffer: &mut BytesMut) -> Result<Dispatched> {
        self.receive(buffer, RecvMode::Blocking)
    }

    /// Like [`Client::wait_message`], but returns `Ok(None)` at once if no
    /// message is queued.
    ///
    /// # Errors
    ///
    /// See [`Client::wait_message`].
    pub fn try_wait_message(&self, buffer: &mut BytesMut) -> Result<Option<Dispatched>> {
        match self.receive(buffer, RecvMode::NonBlocking) {
            Ok(dispatched) => Ok(Some(dispatched)),
            Err(Error::Link(LinkError::WouldBlock)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Dispatch messages until the link closes or the client shuts down.
    ///
    /// Malformed messages and handler failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns any other link error.
    #[instrument(skip(self))]
    pub fn run_dispatcher(&self) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(self.config.receive_buffer_size);
        info!("Dispatcher started");

        loop {
            match self.wait_message(&mut buffer) {
                Ok(dispatched) => trace!("Dispatched {:?}", dispatched),
                Err(Error::Protocol(e)) => warn!("Discarding inbound message: {}", e),
                Err(Error::Handler(e)) => warn!("Event handler failed: {}", e),
                Err(Error::ShuttingDown | Error::Link(LinkError::Closed)) => {
                    info!("Dispatcher stopped");
                    return Ok(());
                }
                Err(e) => {
                    error!("Dispatcher failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    fn receive(&self, buffer: &mut BytesMut, mode: RecvMode) -> Result<Dispatched> {
        self.state.lock().ensure_connected()?;

        buffer.clear();
        self.link.recv(buffer, mode)?;

        let message = Message::decode(buffer)?;
        let id = message.header.id;

        match message.kind() {
            MessageKind::Response => {
                let length = message.header.length as usize;
                self.complete_call(id, &buffer[..length])
            }
            MessageKind::Event => self.route_event(&message),
            kind @ (MessageKind::SyncRequest | MessageKind::AsyncRequest) => {
                warn!("Dropping inbound {:?} {}: clients do not serve requests", kind, id);
                Ok(Dispatched::Dropped(id))
            }
        }
    }

    /// Install a response and wake its awaiters in one critical section, so a
    /// woken caller always finds the descriptor terminal.
    fn complete_call(&self, id: MessageId, raw: &[u8]) -> Result<Dispatched> {
        let mut state = self.state.lock();

        let Some(descriptor) = state.pending.get_mut(id) else {
            drop(state);
            warn!("Dropping response {}: no pending call", id);
            return Ok(Dispatched::Dropped(id));
        };

        if descriptor.status() == CallStatus::Completed {
            drop(state);
            warn!("Dropping duplicate response {}", id);
            return Ok(Dispatched::Dropped(id));
        }

        let installed = descriptor.install(raw);
        let woken = state.awaiters.mark(id);
        drop(state);

        match installed {
            Ok(()) => {
                debug!("Completed call {}, woke {} awaiters", id, woken);
                Ok(Dispatched::Response(id))
            }
            Err(e) => {
                warn!("Response {} does not fit its descriptor: {}", id, e);
                Err(e.into())
            }
        }
    }

    fn route_event(&self, message: &Message) -> Result<Dispatched> {
        let protocol_id = message.header.protocol;
        let action = message.header.action;

        let protocol = self
            .state
            .lock()
            .protocols
            .get(protocol_id)
            .ok_or(HandlerError::UnknownProtocol(protocol_id))?;

        protocol.dispatch(message)?;
        debug!("Handled event {}/{}", protocol_id, action);

        Ok(Dispatched::Event {
            protocol: protocol_id,
            action,
        })
    }
}
