//! Readiness loop for the sockhub server.
//!
//! The server:
//! - Binds one listening socket and registers it with a `mio::Poll`
//! - Accepts, reads and writes client sockets from a single thread
//! - Raises `start`/`connect`/`message`/`disconnect`/`error` events
//! - Stops when its `CancellationToken` is cancelled
//!
//! # State Machine
//!
//! ```text
//!                 initialize() ok
//!  ┌───────────────┐ ─────────────▶ ┌─────────────┐
//!  │ Uninitialized │                │   Running   │ ◀─┐ poll_once()
//!  └───────────────┘ ◀───────────── └─────────────┘ ──┘
//!          listener in the error set
//! ```
//!
//! # Cycle
//!
//! Each [`Server::poll_once`] waits for readiness (bounded by the configured
//! poll timeout) and then runs three phases in a fixed order:
//! 1. read: accept one pending connection, read one chunk per readable client
//! 2. write: write one queued payload per writable client in the write-set
//! 3. error: tear down every socket the poll reported in error
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection I/O errors are handled locally and never end the loop
//! - Handler failures are logged; the cycle carries on

mod dispatch;
mod listener;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use mio::{Events, Interest, Poll, Token};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use sockhub_core::{ConnectionId, EmitError, Event, EventEmitter, EventKind, Handler};

use crate::config::{ConfigError, ServerConfig};
use crate::registry::{Connection, ConnectionRegistry, SendError};

use listener::Listener;

/// Poll token of the listening socket. Client ids start above it.
const LISTENER: Token = Token(0);

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No listening socket; the next cycle binds one
    Uninitialized,
    /// Listening and polling
    Running,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Uninitialized => f.write_str("uninitialized"),
            ServerState::Running => f.write_str("running"),
        }
    }
}

/// Single-threaded TCP server multiplexing all clients over one poll.
///
/// Construct it, register handlers, then call [`Server::run`] (or drive it
/// cycle by cycle with [`Server::poll_once`]).
///
/// ```no_run
/// use sockhub_core::{Event, EventKind};
/// use sockhubd::{ConnectionRegistry, Server, ServerConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # fn main() -> Result<(), sockhubd::ServerError> {
/// let mut server = Server::new(ServerConfig::default(), CancellationToken::new())?;
/// server.on(EventKind::Message, |registry: &mut ConnectionRegistry, event: &Event<'_>| {
///     if let Event::Message { connection, data, .. } = event {
///         registry.send(*connection, data.to_vec())?;
///     }
///     Ok(())
/// });
/// server.run()
/// # }
/// ```
pub struct Server {
    config: ServerConfig,

    poll: Poll,

    events: Events,

    /// Present while running
    listener: Option<Listener>,

    /// Live connections, queues and the write-set
    registry: ConnectionRegistry,

    /// Application handlers, called with the registry as context
    emitter: EventEmitter<ConnectionRegistry>,

    /// Scratch buffer for one bounded read
    read_buf: Vec<u8>,

    cancel_token: CancellationToken,
}

impl Server {
    /// Creates a server. Nothing is bound until the first cycle.
    ///
    /// # Arguments
    ///
    /// * `config` - Listener and loop settings
    /// * `cancel_token` - Token checked once per cycle by [`Server::run`]
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the config does not validate
    /// - `ServerError::Poll` if the OS poll cannot be created
    pub fn new(config: ServerConfig, cancel_token: CancellationToken) -> Result<Self, ServerError> {
        config.validate()?;
        let poll = Poll::new().map_err(ServerError::Poll)?;

        Ok(Self {
            events: Events::with_capacity(config.events_capacity),
            read_buf: vec![0; config.read_chunk_size],
            config,
            poll,
            listener: None,
            registry: ConnectionRegistry::new(),
            emitter: EventEmitter::new(),
            cancel_token,
        })
    }

    // ========================================================================
    // Event subscriptions
    // ========================================================================

    /// Registers a closure for `kind` and returns its handle.
    pub fn on<F>(&mut self, kind: EventKind, f: F) -> Handler<ConnectionRegistry>
    where
        F: Fn(&mut ConnectionRegistry, &Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.emitter.on(kind, f)
    }

    /// Registers `handler` for `kind`. Returns `false` if it already was.
    pub fn register(&mut self, kind: EventKind, handler: Handler<ConnectionRegistry>) -> bool {
        self.emitter.register(kind, handler)
    }

    /// Unregisters `handler` from `kind`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, kind: EventKind, handler: &Handler<ConnectionRegistry>) -> bool {
        self.emitter.unregister(kind, handler)
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.emitter.handler_count(kind)
    }

    // ========================================================================
    // Send API
    // ========================================================================

    /// Queues `payload` for `connection`; written on a later cycle.
    pub fn send(
        &mut self,
        connection: ConnectionId,
        payload: impl Into<Bytes>,
    ) -> Result<(), SendError> {
        self.registry.send(connection, payload)
    }

    /// Queues `payload` for every live connection. Returns how many.
    pub fn sendall(&mut self, payload: impl Into<Bytes>) -> usize {
        self.registry.sendall(payload)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        if self.listener.is_some() {
            ServerState::Running
        } else {
            ServerState::Uninitialized
        }
    }

    /// Returns true while a listening socket is bound.
    pub fn is_initialized(&self) -> bool {
        self.listener.is_some()
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr)
    }

    /// Live connections and their queues.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Settings the server was created with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A clone of the token that stops [`Server::run`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Binds and registers the listening socket, then emits `start`.
    ///
    /// Does nothing but return the bound address if already running.
    ///
    /// # Errors
    ///
    /// - `ServerError::AddressResolution` if the host does not resolve
    /// - `ServerError::SocketSetup` if the socket cannot be created, bound or
    ///   put into listening mode
    /// - `ServerError::Poll` if the listener cannot be registered
    pub fn initialize(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr);
        }

        let mut listener = listener::bind(&self.config)?;
        self.poll
            .registry()
            .register(&mut listener.socket, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        let local_addr = listener.local_addr;
        self.listener = Some(listener);

        info!(
            host = %self.config.host,
            addr = %local_addr,
            backlog = self.config.backlog,
            "Server listening"
        );

        emit_event(
            &self.emitter,
            &mut self.registry,
            &Event::Start {
                host: &self.config.host,
                port: local_addr.port(),
            },
        );

        Ok(local_addr)
    }

    /// Runs cycles until the cancellation token is triggered.
    ///
    /// On cancellation every connection is torn down (emitting `disconnect`)
    /// and the listener is closed.
    ///
    /// # Errors
    ///
    /// Returns initialization failures and poll failures. Both are reported
    /// instead of being retried.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            if self.cancel_token.is_cancelled() {
                info!("Server shutdown requested");
                break;
            }
            self.poll_once()?;
        }

        self.close_all();
        info!("Server stopped");
        Ok(())
    }

    /// Runs one cycle: (re)initialize if needed, poll, then handle read,
    /// write and error readiness in that order.
    ///
    /// # Errors
    ///
    /// Same as [`Server::initialize`], plus `ServerError::Poll` if the poll
    /// itself fails for a reason other than interruption.
    pub fn poll_once(&mut self) -> Result<(), ServerError> {
        if self.listener.is_none() {
            self.initialize()?;
        }

        self.apply_interest_changes();

        let timeout = if self.has_ready() {
            Duration::ZERO
        } else {
            self.config.poll_timeout()
        };

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ServerError::Poll(e));
        }

        let mut errored = Vec::new();
        let mut listener_errored = false;

        for event in self.events.iter() {
            let token = event.token();

            if token == LISTENER {
                if let Some(listener) = self.listener.as_mut() {
                    if event.is_error() {
                        listener_errored = true;
                    } else if event.is_readable() {
                        listener.ready = true;
                    }
                }
                continue;
            }

            let id = ConnectionId::new(token.0);
            let Some(conn) = self.registry.get_mut(id) else {
                continue;
            };
            if event.is_readable() || event.is_read_closed() {
                conn.readable = true;
            }
            if event.is_writable() || event.is_write_closed() {
                conn.writable = true;
            }
            if event.is_error() {
                errored.push(id);
            }
        }

        trace!(
            connections = self.registry.len(),
            errored = errored.len(),
            "Poll cycle"
        );

        self.handle_read_ready();
        self.handle_write_ready();
        self.handle_errors(&errored, listener_errored);

        Ok(())
    }

    /// Tears down one connection: drops it from the read-set, its queue and
    /// the write-set, emits `disconnect`, then closes the socket.
    ///
    /// Returns `false` (and emits nothing) if the connection was already gone.
    pub fn teardown(&mut self, connection: ConnectionId) -> bool {
        match self.registry.remove(connection) {
            Some(conn) => {
                self.close_connection(connection, conn);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Deregisters, announces and closes a connection already removed from
    /// the registry.
    fn close_connection(&mut self, connection: ConnectionId, mut conn: Connection) {
        if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
            debug!(connection = %connection, error = %e, "Failed to deregister connection");
        }

        let remote_addr = conn.remote_addr;
        info!(connection = %connection, peer = %remote_addr, "Connection closed");

        emit_event(
            &self.emitter,
            &mut self.registry,
            &Event::Disconnect {
                connection,
                remote_addr,
            },
        );

        // Dropping the stream closes the socket
        drop(conn);
    }

    /// Tears down every connection and closes the listener.
    fn close_all(&mut self) {
        for (id, conn) in self.registry.drain() {
            self.close_connection(id, conn);
        }

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener.socket) {
                debug!(error = %e, "Failed to deregister listener");
            }
            info!(addr = %listener.local_addr, "Listener closed");
        }
    }

    /// Discards all server-wide state after the listener failed. The next
    /// cycle binds a fresh listener.
    fn reset_listener(&mut self) {
        let addr = self.local_addr();
        error!(
            addr = ?addr,
            connections = self.registry.len(),
            "Listening socket reported an error, resetting server"
        );
        self.close_all();
    }

    /// Registers write interest only for connections in the write-set.
    fn apply_interest_changes(&mut self) {
        for id in self.registry.take_interest_changes() {
            let wants_write = self.registry.is_writing(id);
            let Some(conn) = self.registry.get_mut(id) else {
                continue;
            };

            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if conn.interest == interest {
                continue;
            }

            match self
                .poll
                .registry()
                .reregister(&mut conn.stream, Token(id.get()), interest)
            {
                Ok(()) => conn.interest = interest,
                Err(e) => warn!(connection = %id, error = %e, "Failed to update poll interest"),
            }
        }
    }

    /// True if some socket can make progress without waiting on the poll.
    fn has_ready(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.ready) || self.registry.has_ready()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.registry.len())
            .field("handlers", &self.emitter)
            .finish()
    }
}

/// Emits `event`, logging a handler failure instead of propagating it past
/// the loop.
fn emit_event(
    emitter: &EventEmitter<ConnectionRegistry>,
    registry: &mut ConnectionRegistry,
    event: &Event<'_>,
) {
    if let Err(e) = emitter.emit(registry, event) {
        log_handler_failure(&e, event);
    }
}

fn log_handler_failure(e: &EmitError, event: &Event<'_>) {
    error!(
        event = %e.kind,
        connection = ?event.connection(),
        error = %e,
        "Event handler failed"
    );
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to resolve {addr}: {source}")]
    AddressResolution {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to {stage} on {addr}: {source}")]
    SocketSetup {
        addr: String,
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Poll error: {0}")]
    Poll(#[source] io::Error),
}
