//! Binary wire format shared with every peer implementation.
//!
//! All integers are little-endian. A message is a 16-byte [`MessageHeader`],
//! then one 16-byte descriptor per parameter, then the payloads of all
//! [`Param::Buffer`] parameters concatenated in parameter order.

mod header;
mod message;
mod param;

pub use header::{
    ActionId, HEADER_SIZE, MessageHeader, MessageId, MessageKind, ProtocolId, frame_length,
};
pub use message::Message;
pub use param::{PARAM_SIZE, Param, Width};
