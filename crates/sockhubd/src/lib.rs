//! sockhub daemon - single-threaded TCP connection multiplexer
//!
//! This crate provides the server side of sockhub:
//! - `config` - listener and loop settings (defaults, TOML, environment)
//! - `handlers` - stock logging and echo/broadcast handlers for the binary
//! - `registry` - live connections, their outbound queues and the write-set
//! - `server` - the readiness loop that accepts, reads, writes and tears down
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  ready tokens  ┌──────────────────────────┐
//! │    mio::Poll    │───────────────▶│  read → write → error    │
//! │ (listener and   │                │  handling (Server)       │
//! │  client sockets)│                └─────┬──────────────┬─────┘
//! └─────────────────┘                      │              │
//!                                          ▼              ▼
//!                          ┌──────────────────┐   ┌─────────────────┐
//!                          │ConnectionRegistry│◀──│  EventEmitter   │
//!                          │(queues,write-set)│   │ (app handlers)  │
//!                          └──────────────────┘   └─────────────────┘
//! ```
//!
//! Handlers receive the [`registry::ConnectionRegistry`] while they run, so
//! they can `send`/`sendall` from inside a `message` or `connect` event.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Socket errors are handled per connection and never stop the loop

pub mod config;
pub mod handlers;
pub mod registry;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use handlers::Relay;
pub use registry::{ConnectionRegistry, SendError};
pub use server::{Server, ServerError, ServerState};
