//! Unix-domain socket link for the IPC client
//!
//! Messages are written back to back on the stream; each frame is exactly one
//! wire message and its length comes from the message header. The
//! [`read_message`] and [`write_message`] helpers implement that framing and
//! can be used by peers serving the other end of the socket.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use bytes::BytesMut;
use parking_lot::Mutex;
use proven_ipc::{
    ConnectionHandle, HEADER_SIZE, Link, LinkError, Message, MessageContext, ProtocolError,
    RecvMode, frame_length,
};
use std::io::{self, ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read timeout used to poll the socket for a non-blocking receive.
const POLL_TIMEOUT: Duration = Duration::from_micros(1);

/// Unix socket link configuration
#[derive(Debug, Clone)]
pub struct UnixOptions {
    /// Socket path to connect to
    pub path: PathBuf,
    /// Timeout for a single write (`None` blocks indefinitely)
    pub write_timeout: Option<Duration>,
    /// Largest frame accepted from the peer
    pub max_message_size: usize,
}

impl UnixOptions {
    /// Options for the socket at `path` with default limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_timeout: Some(Duration::from_secs(5)),
            max_message_size: 1024 * 1024,
        }
    }
}

/// The three handles of one connected socket. Reads and writes use separate
/// clones so a blocked dispatcher never holds up a sender.
#[derive(Debug)]
struct Streams {
    reader: Mutex<UnixStream>,
    writer: Mutex<UnixStream>,
    control: UnixStream,
}

impl Streams {
    fn new(stream: UnixStream) -> io::Result<Self> {
        Ok(Self {
            reader: Mutex::new(stream.try_clone()?),
            control: stream.try_clone()?,
            writer: Mutex::new(stream),
        })
    }
}

/// Client link over a Unix-domain stream socket.
#[derive(Debug)]
pub struct UnixLink {
    options: UnixOptions,
    streams: Mutex<Option<Arc<Streams>>>,
    connections: AtomicU64,
}

impl UnixLink {
    /// Create a link; nothing is connected until [`Link::connect`].
    #[must_use]
    pub fn new(options: UnixOptions) -> Self {
        Self {
            options,
            streams: Mutex::new(None),
            connections: AtomicU64::new(0),
        }
    }

    fn streams(&self) -> Result<Arc<Streams>, LinkError> {
        self.streams.lock().clone().ok_or(LinkError::Closed)
    }
}

impl Link for UnixLink {
    fn connect(&self) -> Result<ConnectionHandle, LinkError> {
        let path = &self.options.path;
        debug!("Connecting to {}", path.display());

        let stream = UnixStream::connect(path).map_err(|e| {
            LinkError::ConnectFailed(format!("Failed to connect to {}: {e}", path.display()))
        })?;
        stream.set_write_timeout(self.options.write_timeout)?;

        let streams = Arc::new(Streams::new(stream)?);
        if let Some(previous) = self.streams.lock().replace(streams) {
            let _ = previous.control.shutdown(Shutdown::Both);
        }

        let id = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Unix link connected to {} ({})", path.display(), id);
        Ok(ConnectionHandle::new(id))
    }

    fn send(&self, message: &Message, _context: &MessageContext) -> Result<(), LinkError> {
        let streams = self.streams()?;
        let mut writer = streams.writer.lock();
        write_message(&mut *writer, message)
    }

    fn recv(&self, buffer: &mut BytesMut, mode: RecvMode) -> Result<(), LinkError> {
        let streams = self.streams()?;
        let mut reader = streams.reader.lock();
        let max = self.options.max_message_size;

        match mode {
            RecvMode::Blocking => read_message(&mut *reader, buffer, max),
            RecvMode::NonBlocking => {
                let mut header = [0u8; HEADER_SIZE];

                // Reads hold the reader lock, so the timeout cannot affect
                // anyone else; O_NONBLOCK would also apply to the writer.
                reader.set_read_timeout(Some(POLL_TIMEOUT))?;
                let peeked = reader.read(&mut header);
                reader.set_read_timeout(None)?;

                let filled = match peeked {
                    Ok(0) => return Err(LinkError::Closed),
                    Ok(filled) => filled,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        return Err(LinkError::WouldBlock);
                    }
                    Err(e) => return Err(link_error(e)),
                };

                // A frame has started arriving; read the rest of it blocking.
                reader.read_exact(&mut header[filled..]).map_err(link_error)?;
                read_body(&mut *reader, &header, buffer, max)
            }
        }
    }

    fn destroy(&self) {
        if let Some(streams) = self.streams.lock().take() {
            debug!("Closing Unix link to {}", self.options.path.display());
            if let Err(e) = streams.control.shutdown(Shutdown::Both) {
                warn!("Failed to shut down socket: {}", e);
            }
        }
    }
}

/// Read one message from `reader`, appending it to `buffer`.
///
/// # Errors
///
/// Returns [`LinkError::Closed`] if the stream ends, a framing error if the
/// header is invalid or declares more than `max` bytes, and
/// [`LinkError::Io`] for other read failures.
pub fn read_message<R: Read>(
    reader: &mut R,
    buffer: &mut BytesMut,
    max: usize,
) -> Result<(), LinkError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(link_error)?;
    read_body(reader, &header, buffer, max)
}

fn read_body<R: Read>(
    reader: &mut R,
    header: &[u8; HEADER_SIZE],
    buffer: &mut BytesMut,
    max: usize,
) -> Result<(), LinkError> {
    let length = frame_length(header)?;
    if length > max {
        return Err(ProtocolError::MessageTooLarge { size: length, max }.into());
    }

    buffer.reserve(length);
    buffer.extend_from_slice(header);
    let start = buffer.len();
    buffer.resize(start + length - HEADER_SIZE, 0);
    reader.read_exact(&mut buffer[start..]).map_err(link_error)
}

/// Encode `message` and write it to `writer` as one frame.
///
/// # Errors
///
/// Returns a framing error if the message does not encode,
/// [`LinkError::Closed`] if the peer hung up and [`LinkError::Io`] otherwise.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), LinkError> {
    let data = message.encode()?;
    writer.write_all(&data).map_err(link_error)?;
    writer.flush().map_err(link_error)
}

fn link_error(e: io::Error) -> LinkError {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            LinkError::Closed
        }
        _ => LinkError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proven_ipc::Param;

    #[test]
    fn test_framing_back_to_back() {
        let first = Message::event(1, 1).with_input(Param::buffer(vec![7u8; 5]));
        let second = Message::async_request(2, 3).with_input(Param::u64(9));

        let mut wire = Vec::new();
        write_message(&mut wire, &first).unwrap();
        write_message(&mut wire, &second).unwrap();

        let mut reader = wire.as_slice();
        let mut buffer = BytesMut::new();
        read_message(&mut reader, &mut buffer, 1024).unwrap();
        assert_eq!(Message::decode(&buffer).unwrap(), first);

        buffer.clear();
        read_message(&mut reader, &mut buffer, 1024).unwrap();
        assert_eq!(Message::decode(&buffer).unwrap(), second);

        buffer.clear();
        assert_matches!(
            read_message(&mut reader, &mut buffer, 1024),
            Err(LinkError::Closed)
        );
    }

    #[test]
    fn test_oversized_frame() {
        let message = Message::event(1, 1).with_input(Param::buffer(vec![0u8; 64]));
        let mut wire = Vec::new();
        write_message(&mut wire, &message).unwrap();

        let mut buffer = BytesMut::new();
        assert_matches!(
            read_message(&mut wire.as_slice(), &mut buffer, 32),
            Err(LinkError::Framing(ProtocolError::MessageTooLarge { max: 32, .. }))
        );
    }

    #[test]
    fn test_truncated_frame() {
        let message = Message::event(1, 1).with_input(Param::buffer(vec![1u8; 8]));
        let mut wire = Vec::new();
        write_message(&mut wire, &message).unwrap();
        wire.truncate(wire.len() - 3);

        let mut buffer = BytesMut::new();
        assert_matches!(
            read_message(&mut wire.as_slice(), &mut buffer, 1024),
            Err(LinkError::Closed)
        );
    }

    #[test]
    fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let link = UnixLink::new(UnixOptions::new(dir.path().join("missing.sock")));

        assert_matches!(link.connect(), Err(LinkError::ConnectFailed(_)));
        assert_matches!(
            link.send(&Message::event(1, 1), &MessageContext::new()),
            Err(LinkError::Closed)
        );
    }
}
