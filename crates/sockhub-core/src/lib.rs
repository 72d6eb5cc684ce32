//! sockhub core - shared types for the connection multiplexer
//!
//! This crate provides the pieces of the server that do not touch sockets:
//! - `connection` - connection identifiers
//! - `event` - lifecycle and data events and their names
//! - `emitter` - synchronous publish/subscribe dispatch
//! - `queue` - per-connection outbound payload queues
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod emitter;
pub mod error;
pub mod event;
pub mod queue;

// Re-exports for convenience
pub use connection::{ConnectionId, ConnectionIdGenerator};
pub use emitter::{EventEmitter, Handler};
pub use error::{EmitError, ParseEventKindError};
pub use event::{Event, EventKind};
pub use queue::OutboundQueue;
