//! Transport link abstraction.
//!
//! A link moves encoded messages between the client and its peer and owns the
//! buffers that hold in-flight completion state. Concrete links live in their
//! own crates (`proven-ipc-memory`, `proven-ipc-unix`).

use crate::context::MessageContext;
use crate::error::LinkError;
use crate::wire::Message;

use bytes::BytesMut;
use std::fmt;

/// Opaque handle identifying an established connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a link-specific identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The link-specific identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How [`Link::recv`] behaves when no message is queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvMode {
    /// Block until a message arrives or the link closes.
    Blocking,
    /// Return [`LinkError::WouldBlock`] immediately.
    NonBlocking,
}

/// Capability set a transport must supply to the client.
///
/// Implementations are shared between the thread that invokes and the thread
/// that dispatches, so every method takes `&self`.
pub trait Link: Send + Sync + 'static {
    /// Establish the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached.
    fn connect(&self) -> Result<ConnectionHandle, LinkError>;

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be delivered to the peer.
    fn send(&self, message: &Message, context: &MessageContext) -> Result<(), LinkError>;

    /// Receive one encoded message, appending its bytes to `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::WouldBlock`] in non-blocking mode when nothing is
    /// queued, [`LinkError::Closed`] once the peer is gone.
    fn recv(&self, buffer: &mut BytesMut, mode: RecvMode) -> Result<(), LinkError>;

    /// Hand out a buffer able to hold `size` bytes without reallocating.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::BufferLimit`] if the link cannot spare the memory.
    fn get_buffer(&self, size: usize) -> Result<BytesMut, LinkError> {
        Ok(BytesMut::with_capacity(size))
    }

    /// Take back a buffer obtained from [`Link::get_buffer`].
    fn free_buffer(&self, buffer: BytesMut) {
        drop(buffer);
    }

    /// Tear down the connection. Blocked receives return [`LinkError::Closed`].
    fn destroy(&self);
}
