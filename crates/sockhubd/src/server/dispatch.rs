//! Per-phase socket handling: accept, read, write and error-set teardown.

use std::io::{self, ErrorKind, Read, Write};

use mio::{Interest, Token};
use tracing::{debug, info, trace, warn};

use sockhub_core::{ConnectionId, Event};

use super::{emit_event, Server};

/// Outcome of one write attempt that needs more than bookkeeping.
enum WriteFailure {
    /// Peer stopped reading: report, drop the payload, keep the connection
    BrokenPipe(io::Error),
    /// Peer reset: tear down quietly
    Reset,
    /// Anything else: report, then tear down
    Other(io::Error),
}

impl Server {
    // ========================================================================
    // Read phase
    // ========================================================================

    pub(super) fn handle_read_ready(&mut self) {
        if self.listener.as_ref().is_some_and(|l| l.ready) {
            self.accept_one();
        }

        for id in self.registry.readable_ids() {
            self.read_one(id);
        }
    }

    /// Accepts at most one pending connection. The listener stays marked
    /// ready until accept reports would-block, so a backlog drains one
    /// connection per cycle.
    fn accept_one(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };

        let (mut stream, remote_addr) = match listener.socket.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                listener.ready = false;
                return;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionReset
                ) =>
            {
                debug!(error = %e, "Transient accept error");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                listener.ready = false;
                return;
            }
        };

        let id = self.registry.next_id();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, Token(id.get()), Interest::READABLE)
        {
            warn!(peer = %remote_addr, error = %e, "Failed to register accepted connection");
            return;
        }

        self.registry.insert(id, stream, remote_addr);
        info!(connection = %id, peer = %remote_addr, "Accepted connection");

        emit_event(
            &self.emitter,
            &mut self.registry,
            &Event::Connect {
                connection: id,
                remote_addr,
            },
        );
    }

    /// Reads one bounded chunk from a client.
    fn read_one(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        let remote_addr = conn.remote_addr;

        match conn.stream.read(&mut self.read_buf) {
            Ok(0) => {
                debug!(connection = %id, peer = %remote_addr, "Peer closed connection");
                self.teardown(id);
            }
            Ok(n) => {
                trace!(connection = %id, len = n, "Read data from socket");
                let data = self.read_buf.get(..n).unwrap_or_default();
                emit_event(
                    &self.emitter,
                    &mut self.registry,
                    &Event::Message {
                        connection: id,
                        remote_addr,
                        data,
                    },
                );
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                conn.readable = false;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                debug!(connection = %id, peer = %remote_addr, "Connection reset by peer");
                self.teardown(id);
            }
            Err(e) => {
                warn!(connection = %id, peer = %remote_addr, error = %e, "Error reading from socket");
                emit_event(
                    &self.emitter,
                    &mut self.registry,
                    &Event::Error {
                        connection: id,
                        remote_addr,
                        error: &e,
                    },
                );
                self.teardown(id);
            }
        }
    }

    // ========================================================================
    // Write phase
    // ========================================================================

    pub(super) fn handle_write_ready(&mut self) {
        for id in self.registry.writable_ids() {
            self.write_one(id);
        }
    }

    /// Writes (the rest of) the head payload of one connection's queue.
    fn write_one(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        let remote_addr = conn.remote_addr;

        match conn.stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                debug!(connection = %id, error = %e, "Socket no longer usable, closing");
                self.teardown(id);
                return;
            }
        }

        let Some(payload) = conn.queue.front() else {
            // Nothing left to write
            self.registry.stop_writing(id);
            return;
        };

        if payload.is_empty() {
            conn.queue.pop_front();
            return;
        }

        let failure = match conn.stream.write(payload) {
            Ok(0) => Some(WriteFailure::Other(ErrorKind::WriteZero.into())),
            Ok(n) => {
                let complete = conn.queue.advance(n);
                trace!(connection = %id, len = n, complete, "Wrote data to socket");
                None
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                conn.writable = false;
                None
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => None,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                conn.queue.pop_front();
                Some(WriteFailure::BrokenPipe(e))
            }
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Some(WriteFailure::Reset),
            Err(e) => Some(WriteFailure::Other(e)),
        };

        match failure {
            None => {}
            Some(WriteFailure::BrokenPipe(e)) => {
                warn!(connection = %id, peer = %remote_addr, "Broken pipe, payload dropped");
                emit_event(
                    &self.emitter,
                    &mut self.registry,
                    &Event::Error {
                        connection: id,
                        remote_addr,
                        error: &e,
                    },
                );
            }
            Some(WriteFailure::Reset) => {
                debug!(connection = %id, peer = %remote_addr, "Connection reset by peer");
                self.teardown(id);
            }
            Some(WriteFailure::Other(e)) => {
                warn!(connection = %id, peer = %remote_addr, error = %e, "Error writing to socket");
                emit_event(
                    &self.emitter,
                    &mut self.registry,
                    &Event::Error {
                        connection: id,
                        remote_addr,
                        error: &e,
                    },
                );
                self.teardown(id);
            }
        }
    }

    // ========================================================================
    // Error phase
    // ========================================================================

    pub(super) fn handle_errors(&mut self, errored: &[ConnectionId], listener_errored: bool) {
        for id in errored {
            if self.teardown(*id) {
                debug!(connection = %id, "Closed connection reported in error");
            }
        }

        if listener_errored {
            self.reset_listener();
        }
    }
}
