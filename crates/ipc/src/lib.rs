//! Client runtime for a lightweight inter-process messaging protocol.
//!
//! Components invoke remote operations and receive asynchronous events over a
//! transport [`Link`]. The client assigns message ids, tracks the completion
//! state of synchronous calls, blocks callers until their calls complete and
//! routes inbound events to registered [`Protocol`] handlers.
//!
//! # Features
//!
//! - **Pluggable links**: any transport implementing [`Link`]
//! - **Completion tracking**: one descriptor per synchronous call, extracted exactly once
//! - **ANY/ALL awaits**: block on a single call or a dynamic set of calls
//! - **Event routing**: inbound events dispatched to protocol action handlers
//!
//! # Example
//!
//! ```no_run
//! use proven_ipc::{Client, Link, Message, MessageContext, OutParam, Param, Width};
//! use std::thread;
//!
//! fn example(link: impl Link) -> proven_ipc::Result<()> {
//!     let client = Client::builder().link(link).build()?;
//!
//!     thread::scope(|scope| {
//!         scope.spawn(|| client.run_dispatcher());
//!
//!         let mut request = Message::sync_request(1, 2)
//!             .with_input(Param::u32(42))
//!             .with_output(Param::value(0, Width::W4));
//!         let mut context = MessageContext::new();
//!
//!         client.invoke(&mut context, &mut request)?;
//!         client.await_completion(&context)?;
//!
//!         let mut out = OutParam::slots_for(&request);
//!         client.status(&context, &mut out)?;
//!         println!("result: {:?}", out[0].as_u32());
//!
//!         client.shutdown()
//!     })
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod awaiter;
mod client;
mod context;
pub mod error;
mod link;
mod pending;
mod protocol;
pub mod wire;

pub use awaiter::AwaitMode;
pub use client::{Client, ClientBuilder, ClientConfig, Dispatched, OutParam};
pub use context::MessageContext;
pub use error::{Error, ErrorCode, HandlerError, LinkError, ProtocolError, Result};
pub use link::{ConnectionHandle, Link, RecvMode};
pub use pending::CallStatus;
pub use protocol::{Action, Protocol};
pub use wire::{
    ActionId, HEADER_SIZE, Message, MessageHeader, MessageId, MessageKind, PARAM_SIZE, Param,
    ProtocolId, Width, frame_length,
};

// Re-export dependencies that are part of our public API
pub use bytes::{Bytes, BytesMut};
