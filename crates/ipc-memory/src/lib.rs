//! In-memory IPC link for testing
//!
//! [`pair`] returns the two ends of an in-process connection: a
//! [`MemoryLink`] for the client and a [`MemoryPeer`] that plays the server,
//! receiving requests and sending back responses and events.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use bytes::{Bytes, BytesMut};
use proven_ipc::{ConnectionHandle, Link, LinkError, Message, MessageContext, Param, RecvMode};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How often a blocked receive re-checks whether the link was destroyed.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for memory links
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Maximum bytes of completion buffers the client may hold at once
    /// (`None` for no limit)
    pub buffer_limit: Option<usize>,
    /// Capacity of each direction's queue (`None` for unbounded)
    pub queue_capacity: Option<usize>,
}

/// State shared by both ends of a pair.
#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    connections: AtomicU64,
    outstanding: AtomicUsize,
}

/// Create a connected link/peer pair.
#[must_use]
pub fn pair(options: MemoryOptions) -> (MemoryLink, MemoryPeer) {
    let channel = || match options.queue_capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    };
    let (client_to_peer_tx, client_to_peer_rx) = channel();
    let (peer_to_client_tx, peer_to_client_rx) = channel();

    let shared = Arc::new(Shared::default());

    let link = MemoryLink {
        sender: client_to_peer_tx,
        receiver: peer_to_client_rx,
        shared: Arc::clone(&shared),
        options,
    };
    let peer = MemoryPeer {
        sender: peer_to_client_tx,
        receiver: client_to_peer_rx,
        shared,
    };

    (link, peer)
}

/// Client end of an in-memory connection.
#[derive(Clone)]
pub struct MemoryLink {
    sender: flume::Sender<Bytes>,
    receiver: flume::Receiver<Bytes>,
    shared: Arc<Shared>,
    options: MemoryOptions,
}

impl MemoryLink {
    /// Bytes of completion buffers handed out and not yet returned.
    #[must_use]
    pub fn outstanding_buffer_bytes(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Whether either end closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn reserve(&self, size: usize) -> Result<(), LinkError> {
        let Some(limit) = self.options.buffer_limit else {
            self.shared.outstanding.fetch_add(size, Ordering::SeqCst);
            return Ok(());
        };

        self.shared
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(size).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|current| LinkError::BufferLimit {
                requested: size,
                available: limit.saturating_sub(current),
            })
    }
}

impl Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .field("outstanding", &self.outstanding_buffer_bytes())
            .finish_non_exhaustive()
    }
}

impl Link for MemoryLink {
    fn connect(&self) -> Result<ConnectionHandle, LinkError> {
        if self.is_closed() {
            return Err(LinkError::ConnectFailed("memory link is closed".to_string()));
        }

        let id = self.shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Memory link connected ({})", id);
        Ok(ConnectionHandle::new(id))
    }

    fn send(&self, message: &Message, _context: &MessageContext) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }

        let data = message.encode()?;
        debug!("Memory link sending {} bytes", data.len());

        self.sender.send(data).map_err(|_| LinkError::Closed)
    }

    fn recv(&self, buffer: &mut BytesMut, mode: RecvMode) -> Result<(), LinkError> {
        let data = match mode {
            RecvMode::NonBlocking => match self.receiver.try_recv() {
                Ok(data) => data,
                Err(flume::TryRecvError::Empty) if !self.is_closed() => {
                    return Err(LinkError::WouldBlock);
                }
                Err(_) => return Err(LinkError::Closed),
            },
            RecvMode::Blocking => recv_until_closed(&self.receiver, &self.shared, None)?
                .ok_or(LinkError::Closed)?,
        };

        debug!("Memory link received {} bytes", data.len());
        buffer.extend_from_slice(&data);
        Ok(())
    }

    fn get_buffer(&self, size: usize) -> Result<BytesMut, LinkError> {
        self.reserve(size)?;

        let buffer = BytesMut::with_capacity(size);
        // Account for what was actually allocated so free_buffer balances.
        if let Some(extra) = buffer.capacity().checked_sub(size) {
            self.shared.outstanding.fetch_add(extra, Ordering::SeqCst);
        }
        Ok(buffer)
    }

    fn free_buffer(&self, buffer: BytesMut) {
        self.shared
            .outstanding
            .fetch_sub(buffer.capacity(), Ordering::SeqCst);
    }

    fn destroy(&self) {
        debug!("Closing memory link");
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

/// Server end of an in-memory connection.
pub struct MemoryPeer {
    sender: flume::Sender<Bytes>,
    receiver: flume::Receiver<Bytes>,
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// Receive the next message from the client, blocking until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Closed`] once the client side is gone, or a
    /// framing error if the bytes do not decode.
    pub fn recv_message(&self) -> Result<Message, LinkError> {
        let data = recv_until_closed(&self.receiver, &self.shared, None)?.ok_or(LinkError::Closed)?;
        Ok(Message::decode(&data)?)
    }

    /// Receive the next message, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// See [`MemoryPeer::recv_message`].
    pub fn recv_message_timeout(&self, timeout: Duration) -> Result<Option<Message>, LinkError> {
        let deadline = Instant::now() + timeout;
        recv_until_closed(&self.receiver, &self.shared, Some(deadline))?
            .map(|data| Message::decode(&data).map_err(LinkError::from))
            .transpose()
    }

    /// Send a message to the client as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not encode or the client is gone.
    pub fn send_message(&self, message: &Message) -> Result<(), LinkError> {
        self.send_raw(message.encode()?)
    }

    /// Send raw bytes to the client, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Closed`] if the client is gone.
    pub fn send_raw(&self, data: Bytes) -> Result<(), LinkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.sender.send(data).map_err(|_| LinkError::Closed)
    }

    /// Answer `request` with the given results.
    ///
    /// # Errors
    ///
    /// See [`MemoryPeer::send_message`].
    pub fn reply(
        &self,
        request: &Message,
        outputs: impl IntoIterator<Item = Param>,
    ) -> Result<(), LinkError> {
        let response = outputs
            .into_iter()
            .fold(Message::response_to(request), Message::with_output);
        self.send_message(&response)
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        debug!("Closing memory peer");
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

impl Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .field("queued", &self.receiver.len())
            .finish_non_exhaustive()
    }
}

/// Block on `receiver` until data arrives, the connection closes or the
/// deadline passes (`Ok(None)`). Queued data is still delivered after close.
fn recv_until_closed(
    receiver: &flume::Receiver<Bytes>,
    shared: &Shared,
    deadline: Option<Instant>,
) -> Result<Option<Bytes>, LinkError> {
    loop {
        let mut wait = CLOSE_POLL_INTERVAL;
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            wait = wait.min(left);
        }

        match receiver.recv_timeout(wait) {
            Ok(data) => return Ok(Some(data)),
            Err(flume::RecvTimeoutError::Timeout) => {
                if shared.closed.load(Ordering::SeqCst) {
                    return Err(LinkError::Closed);
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => return Err(LinkError::Closed),
        }
    }
}
