//! Error types for the IPC client.

use crate::wire::{ActionId, MessageId, ProtocolId};

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An argument failed validation. No client state was changed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A descriptor or awaiter allocation could not be satisfied.
    #[error("Out of memory: could not allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },

    /// The result of this message was already extracted (or never existed).
    #[error("Message {0} was already consumed")]
    AlreadyConsumed(MessageId),

    /// An await did not complete before its deadline.
    #[error("Await timed out after {0:?}")]
    Timeout(Duration),

    /// The client has been shut down.
    #[error("Client is shutting down")]
    ShuttingDown,

    /// Transport link errors.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Errors raised while dispatching an event to a protocol action.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Errors reported by a transport link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Failed to establish the connection.
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    /// The link is closed or the peer went away.
    #[error("Link closed")]
    Closed,

    /// A non-blocking receive found no message.
    #[error("No message available")]
    WouldBlock,

    /// The link refused to hand out another buffer.
    #[error("Buffer limit reached: requested {requested}, available {available}")]
    BufferLimit {
        /// Size of the requested buffer.
        requested: usize,
        /// Bytes still available to the client.
        available: usize,
    },

    /// Received bytes could not be framed as a message.
    #[error("Framing error: {0}")]
    Framing(#[from] ProtocolError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not enough bytes for the structure being decoded.
    #[error("Truncated message: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// Header flags name no known message kind.
    #[error("Unknown message kind: {0:#x}")]
    UnknownKind(u32),

    /// Reserved flag bits were set.
    #[error("Reserved flag bits set: {0:#010x}")]
    ReservedFlags(u32),

    /// Unknown parameter tag.
    #[error("Unknown parameter tag: {0:#x}")]
    UnknownParamTag(u8),

    /// Invalid value width.
    #[error("Invalid value width: {0}")]
    InvalidWidth(u32),

    /// Declared length disagrees with the encoded contents.
    #[error("Length mismatch: header declares {declared}, contents need {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Length computed from the parameters.
        actual: usize,
    },

    /// Parameter counts disagree with the parameter list.
    #[error("Parameter count mismatch: header declares {declared}, message holds {actual}")]
    ParamCountMismatch {
        /// `param_in + param_out` from the header.
        declared: usize,
        /// Number of parameters present.
        actual: usize,
    },

    /// A parameter appears where its kind is not allowed.
    #[error("Invalid parameter at index {index}: {reason}")]
    InvalidParam {
        /// Index of the parameter.
        index: usize,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Message exceeds the configured or representable size.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the message.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The stored response does not match the caller's output slots.
    #[error("Response for message {id} does not match output slot {index}: {reason}")]
    OutputMismatch {
        /// Message id.
        id: MessageId,
        /// Output slot index.
        index: usize,
        /// What went wrong.
        reason: &'static str,
    },
}

/// Errors raised while invoking protocol actions.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No protocol registered under this id.
    #[error("No protocol registered with id {0}")]
    UnknownProtocol(ProtocolId),

    /// The protocol has no action with this id.
    #[error("Protocol {protocol} has no action {action}")]
    UnknownAction {
        /// Protocol id.
        protocol: ProtocolId,
        /// Action id.
        action: ActionId,
    },

    /// The handler itself failed.
    #[error("Handler failed: {0}")]
    Failed(String),
}

/// Stable error categories for callers that need a numeric code, such as FFI shims.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Argument validation failed.
    InvalidArgument,
    /// Allocation failed.
    OutOfMemory,
    /// Result already extracted.
    AlreadyConsumed,
    /// Await deadline reached.
    TimedOut,
    /// Client shut down.
    ShuttingDown,
    /// Link failure.
    Transport,
    /// Malformed or unexpected message.
    Protocol,
    /// Event handler failure.
    Handler,
}

impl ErrorCode {
    /// The closest Linux `errno` value for this category.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => 22, // EINVAL
            Self::OutOfMemory => 12,     // ENOMEM
            Self::AlreadyConsumed => 114, // EALREADY
            Self::TimedOut => 110,       // ETIMEDOUT
            Self::ShuttingDown => 108,   // ESHUTDOWN
            Self::Transport => 5,        // EIO
            Self::Protocol => 71,        // EPROTO
            Self::Handler => 38,         // ENOSYS
        }
    }
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Self::AlreadyConsumed(_) => ErrorCode::AlreadyConsumed,
            Self::Timeout(_) => ErrorCode::TimedOut,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::Link(_) => ErrorCode::Transport,
            Self::Protocol(_) => ErrorCode::Protocol,
            Self::Handler(_) => ErrorCode::Handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidArgument("x".to_string()).code().errno(),
            22
        );
        assert_eq!(Error::AlreadyConsumed(7).code(), ErrorCode::AlreadyConsumed);
        assert_eq!(
            Error::from(LinkError::Closed).code(),
            ErrorCode::Transport
        );
        assert_eq!(
            Error::from(HandlerError::UnknownProtocol(3)).code(),
            ErrorCode::Handler
        );
    }

    #[test]
    fn test_display() {
        let err = Error::from(ProtocolError::Truncated {
            needed: 16,
            available: 4,
        });
        assert_eq!(
            err.to_string(),
            "Protocol error: Truncated message: need 16 bytes, have 4"
        );
    }
}
