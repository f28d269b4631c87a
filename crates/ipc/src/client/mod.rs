//! IPC client: invocation, completion tracking and inbound dispatch.

mod dispatch;
mod invoke;
mod status;
mod wait;

pub use dispatch::Dispatched;
pub use status::OutParam;

use crate::awaiter::AwaiterSet;
use crate::error::{Error, Result};
use crate::link::{ConnectionHandle, Link};
use crate::pending::PendingCalls;
use crate::protocol::{Protocol, ProtocolRegistry};
use crate::wire::{HEADER_SIZE, MessageId, ProtocolId};

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Configuration for the IPC client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied by the awaits that take no explicit timeout.
    pub default_timeout: Duration,
    /// Largest message the client will send, and the largest response a
    /// synchronous call may declare.
    pub max_message_size: usize,
    /// Initial capacity of the buffer used by [`Client::run_dispatcher`].
    pub receive_buffer_size: usize,
    /// First message id handed out.
    pub initial_message_id: MessageId,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_message_size: 1024 * 1024,
            receive_buffer_size: 64 * 1024,
            initial_message_id: 0,
        }
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<()> {
        if self.max_message_size < HEADER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "max_message_size {} is smaller than a message header",
                self.max_message_size
            )));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "default_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for creating IPC clients.
pub struct ClientBuilder {
    link: Option<Arc<dyn Link>>,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            link: None,
            config: ClientConfig::default(),
        }
    }

    /// Set the transport link.
    #[must_use]
    pub fn link<L: Link>(mut self, link: L) -> Self {
        self.link = Some(Arc::new(link));
        self
    }

    /// Set a transport link that is shared with other owners.
    #[must_use]
    pub fn shared_link(mut self, link: Arc<dyn Link>) -> Self {
        self.link = Some(link);
        self
    }

    /// Set the default await timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the dispatcher's receive buffer size.
    #[must_use]
    pub const fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Set the first message id.
    #[must_use]
    pub const fn initial_message_id(mut self, id: MessageId) -> Self {
        self.config.initial_message_id = id;
        self
    }

    /// Connect and build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if no link was set, the configuration is invalid or
    /// the link fails to connect.
    pub fn build(self) -> Result<Client> {
        let link = self
            .link
            .ok_or_else(|| Error::InvalidArgument("link not specified".to_string()))?;

        Client::create(self.config, link)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by every operation, guarded by the client mutex.
#[derive(Debug, Default)]
struct State {
    connection: Option<ConnectionHandle>,
    pending: PendingCalls,
    awaiters: AwaiterSet,
    protocols: ProtocolRegistry,
}

impl State {
    const fn ensure_connected(&self) -> Result<()> {
        if self.connection.is_none() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }
}

/// Client side of an IPC connection.
///
/// One thread should drive [`Client::wait_message`] (or
/// [`Client::run_dispatcher`]); any number of threads may invoke, await and
/// extract results concurrently.
pub struct Client {
    link: Arc<dyn Link>,
    config: ClientConfig,
    next_id: AtomicU32,
    state: Mutex<State>,
}

impl Client {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Validate the configuration and connect the link.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the link fails to
    /// connect. Nothing needs to be torn down in either case.
    #[instrument(skip(config, link))]
    pub fn create(config: ClientConfig, link: Arc<dyn Link>) -> Result<Self> {
        config.validate()?;

        let connection = link.connect().inspect_err(|e| {
            warn!("Failed to connect link: {}", e);
        })?;
        info!("Client connected on {}", connection);

        Ok(Self {
            link,
            next_id: AtomicU32::new(config.initial_message_id),
            config,
            state: Mutex::new(State {
                connection: Some(connection),
                ..State::default()
            }),
        })
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Tear the client down: release every outstanding completion buffer,
    /// wake blocked awaiters (they fail with [`Error::ShuttingDown`]) and
    /// destroy the link. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Does not fail at present.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Result<()> {
        let (connection, buffers, woken) = {
            let mut state = self.state.lock();
            let Some(connection) = state.connection.take() else {
                debug!("Client already shut down");
                return Ok(());
            };

            let woken = state.awaiters.wake_all();
            let buffers: Vec<_> = state
                .pending
                .drain()
                .map(|(_, descriptor)| descriptor.into_buffer())
                .collect();
            (connection, buffers, woken)
        };

        let released = buffers.len();
        for buffer in buffers {
            self.link.free_buffer(buffer);
        }
        self.link.destroy();

        info!(
            "Client on {} shut down: released {} pending calls, woke {} awaiters",
            connection, released, woken
        );
        Ok(())
    }

    /// Register a protocol whose events this client handles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a protocol with the same id is
    /// already registered.
    pub fn register(&self, protocol: Protocol) -> Result<()> {
        let id = protocol.id();
        let mut state = self.lock_connected()?;
        state.protocols.insert(protocol).map_err(|rejected| {
            Error::InvalidArgument(format!(
                "protocol {} ({}) is already registered",
                rejected.id(),
                rejected.name()
            ))
        })?;
        drop(state);

        debug!("Registered protocol {}", id);
        Ok(())
    }

    /// Remove a protocol registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no protocol has this id.
    pub fn unregister(&self, id: ProtocolId) -> Result<Arc<Protocol>> {
        let mut state = self.lock_connected()?;
        let protocol = state.protocols.remove(id).ok_or_else(|| {
            Error::InvalidArgument(format!("protocol {id} is not registered"))
        })?;
        drop(state);

        debug!("Unregistered protocol {} ({})", id, protocol.name());
        Ok(protocol)
    }

    /// Number of synchronous calls whose results have not been extracted.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of callers blocked in an await.
    #[must_use]
    pub fn waiting_callers(&self) -> usize {
        self.state.lock().awaiters.len()
    }

    /// Whether the client is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_connected(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to shut down client on drop: {}", e);
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("connection", &state.connection)
            .field("pending_calls", &state.pending.len())
            .field("waiting_callers", &state.awaiters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::MessageContext;
    use crate::error::LinkError;
    use crate::link::RecvMode;
    use crate::pending::CallStatus;
    use crate::wire::{Message, Param, Width};

    use assert_matches::assert_matches;
    use bytes::{Bytes, BytesMut};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Link double: records what is sent and replays queued inbound frames.
    #[derive(Default)]
    pub(crate) struct MockLink {
        pub(crate) refuse_connect: bool,
        pub(crate) fail_sends: AtomicBool,
        pub(crate) buffer_limit: Option<usize>,
        pub(crate) sent: Mutex<Vec<Message>>,
        pub(crate) inbound: Mutex<VecDeque<Bytes>>,
        pub(crate) outstanding: AtomicUsize,
        pub(crate) destroyed: AtomicBool,
    }

    impl MockLink {
        pub(crate) fn push_inbound(&self, message: &Message) {
            let encoded = message.encode().unwrap();
            self.inbound.lock().push_back(encoded);
        }

        pub(crate) fn last_sent(&self) -> Message {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    impl Link for MockLink {
        fn connect(&self) -> std::result::Result<ConnectionHandle, LinkError> {
            if self.refuse_connect {
                return Err(LinkError::ConnectFailed("refused".to_string()));
            }
            Ok(ConnectionHandle::new(1))
        }

        fn send(
            &self,
            message: &Message,
            _context: &MessageContext,
        ) -> std::result::Result<(), LinkError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(LinkError::Closed);
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn recv(&self, buffer: &mut BytesMut, mode: RecvMode) -> std::result::Result<(), LinkError> {
            match self.inbound.lock().pop_front() {
                Some(frame) => {
                    buffer.extend_from_slice(&frame);
                    Ok(())
                }
                None if mode == RecvMode::NonBlocking => Err(LinkError::WouldBlock),
                None => Err(LinkError::Closed),
            }
        }

        fn get_buffer(&self, size: usize) -> std::result::Result<BytesMut, LinkError> {
            let outstanding = self.outstanding.load(Ordering::SeqCst);
            if let Some(limit) = self.buffer_limit {
                if outstanding + size > limit {
                    return Err(LinkError::BufferLimit {
                        requested: size,
                        available: limit - outstanding,
                    });
                }
            }
            let buffer = BytesMut::with_capacity(size);
            self.outstanding.fetch_add(buffer.capacity(), Ordering::SeqCst);
            Ok(buffer)
        }

        fn free_buffer(&self, buffer: BytesMut) {
            self.outstanding.fetch_sub(buffer.capacity(), Ordering::SeqCst);
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    fn client_with(link: MockLink) -> (Client, Arc<MockLink>) {
        let link = Arc::new(link);
        let client = Client::builder()
            .shared_link(Arc::clone(&link) as Arc<dyn Link>)
            .default_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        (client, link)
    }

    fn echo_request() -> Message {
        Message::sync_request(1, 1)
            .with_input(Param::u32(5))
            .with_output(Param::value(0, Width::W4))
    }

    #[test]
    fn test_build_without_link() {
        assert_matches!(Client::builder().build(), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_connect_failure_creates_nothing() {
        let link = Arc::new(MockLink {
            refuse_connect: true,
            ..MockLink::default()
        });
        let result = Client::create(ClientConfig::default(), Arc::clone(&link) as Arc<dyn Link>);

        assert_matches!(result, Err(Error::Link(LinkError::ConnectFailed(_))));
        assert!(!link.destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_config() {
        let result = Client::builder()
            .link(MockLink::default())
            .max_message_size(4)
            .build();
        assert_matches!(result, Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_ids_start_at_configured_value() {
        let link = Arc::new(MockLink::default());
        let client = Client::builder()
            .shared_link(Arc::clone(&link) as Arc<dyn Link>)
            .initial_message_id(40)
            .build()
            .unwrap();

        let mut first = MessageContext::new();
        let mut second = MessageContext::new();
        client.invoke(&mut first, &mut Message::event(1, 1)).unwrap();
        client.invoke(&mut second, &mut Message::event(1, 1)).unwrap();

        assert_eq!(first.message_id(), Some(40));
        assert_eq!(second.message_id(), Some(41));
        assert_eq!(link.last_sent().header.id, 41);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (client, _link) = client_with(MockLink::default());
        client.register(Protocol::new(4, "one")).unwrap();

        assert_matches!(
            client.register(Protocol::new(4, "two")),
            Err(Error::InvalidArgument(_))
        );
        assert_eq!(client.unregister(4).unwrap().name(), "one");
        assert_matches!(client.unregister(4), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (client, link) = client_with(MockLink::default());
        let mut context = MessageContext::new();
        client.invoke(&mut context, &mut echo_request()).unwrap();
        assert!(link.outstanding.load(Ordering::SeqCst) > 0);

        client.shutdown().unwrap();
        client.shutdown().unwrap();

        assert!(!client.is_connected());
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(link.outstanding.load(Ordering::SeqCst), 0);
        assert!(link.destroyed.load(Ordering::SeqCst));

        assert_matches!(
            client.invoke(&mut MessageContext::new(), &mut echo_request()),
            Err(Error::ShuttingDown)
        );
        assert_matches!(client.await_completion(&context), Err(Error::ShuttingDown));
    }

    #[test]
    fn test_drop_destroys_link() {
        let (client, link) = client_with(MockLink::default());
        drop(client);
        assert!(link.destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_request_round_trip_through_mock() {
        let (client, link) = client_with(MockLink::default());
        let mut context = MessageContext::new();
        client.invoke(&mut context, &mut echo_request()).unwrap();

        let request = link.last_sent();
        link.push_inbound(&Message::response_to(&request).with_output(Param::u32(0xABCD)));

        let mut buffer = BytesMut::new();
        assert_eq!(
            client.try_wait_message(&mut buffer).unwrap(),
            Some(Dispatched::Response(request.header.id))
        );
        assert_eq!(client.try_wait_message(&mut buffer).unwrap(), None);

        client.await_completion(&context).unwrap();
        let mut out = [OutParam::value(Width::W4)];
        assert_eq!(client.status(&context, &mut out).unwrap(), CallStatus::Completed);
        assert_eq!(out[0].as_u32(), Some(0xABCD));
        assert_eq!(link.outstanding.load(Ordering::SeqCst), 0);
    }
}
