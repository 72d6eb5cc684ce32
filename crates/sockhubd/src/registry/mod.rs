//! Connection registry and outbound send API.
//!
//! The registry is the single owner of client connection state:
//! - the read-set: every live connection, keyed by [`ConnectionId`]
//! - one [`OutboundQueue`](sockhub_core::OutboundQueue) per connection
//! - the write-set: connections with output waiting to be written
//!
//! `send`/`sendall` only queue. Bytes reach the socket in the write phase of
//! a later poll cycle.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Unknown connections are reported through [`SendError`]

mod connection;

pub use connection::Connection;

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::TcpStream;
use thiserror::Error;
use tracing::debug;

use sockhub_core::{ConnectionId, ConnectionIdGenerator};

/// First raw id handed to a client; lower values are poll tokens owned by the
/// server itself.
pub(crate) const FIRST_CONNECTION_ID: usize = 1;

/// Live connections, their queues and the write-set.
///
/// This is also the context handed to event handlers, so everything public
/// here is what application code may do while an event is being dispatched.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Read-set: all live connections
    connections: HashMap<ConnectionId, Connection>,

    /// Write-set: connections with pending output
    write_set: BTreeSet<ConnectionId>,

    /// Connections whose poll interest must be re-registered
    interest_changed: BTreeSet<ConnectionId>,

    ids: ConnectionIdGenerator,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            write_set: BTreeSet::new(),
            interest_changed: BTreeSet::new(),
            ids: ConnectionIdGenerator::starting_at(FIRST_CONNECTION_ID),
        }
    }

    // ========================================================================
    // Send API
    // ========================================================================

    /// Queues `payload` for `connection` and puts it in the write-set.
    ///
    /// # Errors
    ///
    /// - `SendError::UnknownConnection` if the connection is not registered
    pub fn send(
        &mut self,
        connection: ConnectionId,
        payload: impl Into<Bytes>,
    ) -> Result<(), SendError> {
        let payload = payload.into();
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(SendError::UnknownConnection(connection))?;

        debug!(connection = %connection, len = payload.len(), "Queued payload");
        conn.queue.push(payload);
        self.mark_writing(connection);
        Ok(())
    }

    /// Queues `payload` for every connection registered right now.
    ///
    /// Returns the number of connections the payload was queued for.
    pub fn sendall(&mut self, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();

        for id in &ids {
            if let Some(conn) = self.connections.get_mut(id) {
                conn.queue.push(payload.clone());
            }
            self.mark_writing(*id);
        }

        debug!(connections = ids.len(), len = payload.len(), "Queued payload for all");
        ids.len()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns true if `connection` is live.
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    /// Remote address of a live connection.
    pub fn remote_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(Connection::remote_addr)
    }

    /// Number of payloads queued for `connection` (0 if unknown).
    pub fn pending(&self, connection: ConnectionId) -> usize {
        self.connections
            .get(&connection)
            .map_or(0, Connection::pending)
    }

    /// Returns true if `connection` is in the write-set.
    pub fn is_writing(&self, connection: ConnectionId) -> bool {
        self.write_set.contains(&connection)
    }

    /// Ids of all live connections, in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids in the write-set, in ascending order.
    pub fn writing_ids(&self) -> Vec<ConnectionId> {
        self.write_set.iter().copied().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // ========================================================================
    // Server-side bookkeeping
    // ========================================================================

    /// Hands out the id the next accepted connection will get.
    pub(crate) fn next_id(&mut self) -> ConnectionId {
        self.ids.next_id()
    }

    /// Adds an accepted connection to the read-set with an empty queue.
    pub(crate) fn insert(&mut self, id: ConnectionId, stream: TcpStream, remote_addr: SocketAddr) {
        self.connections
            .insert(id, Connection::new(stream, remote_addr));
    }

    pub(crate) fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&connection)
    }

    /// Removes a connection from the read-set, discards its queue and removes
    /// it from the write-set. Returns `None` if it was already gone.
    pub(crate) fn remove(&mut self, connection: ConnectionId) -> Option<Connection> {
        let mut conn = self.connections.remove(&connection)?;
        conn.queue.clear();
        self.write_set.remove(&connection);
        self.interest_changed.remove(&connection);
        Some(conn)
    }

    /// Drops `connection` from the write-set.
    pub(crate) fn stop_writing(&mut self, connection: ConnectionId) {
        if self.write_set.remove(&connection) {
            self.interest_changed.insert(connection);
        }
    }

    /// Connections the poll reported (or left) readable.
    pub(crate) fn readable_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.readable)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Write-set members currently believed writable.
    pub(crate) fn writable_ids(&self) -> Vec<ConnectionId> {
        self.write_set
            .iter()
            .filter(|id| self.connections.get(*id).is_some_and(|c| c.writable))
            .copied()
            .collect()
    }

    /// Returns true if some connection can make progress without a new
    /// readiness notification.
    pub(crate) fn has_ready(&self) -> bool {
        self.connections
            .iter()
            .any(|(id, c)| c.readable || (c.writable && self.write_set.contains(id)))
    }

    /// Takes the set of connections whose poll interest is stale.
    pub(crate) fn take_interest_changes(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.interest_changed)
            .into_iter()
            .collect()
    }

    /// Removes every connection, returning them for teardown.
    pub(crate) fn drain(&mut self) -> Vec<(ConnectionId, Connection)> {
        self.write_set.clear();
        self.interest_changed.clear();
        let mut all: Vec<(ConnectionId, Connection)> = self.connections.drain().collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    fn mark_writing(&mut self, connection: ConnectionId) {
        if self.write_set.insert(connection) {
            self.interest_changed.insert(connection);
            // Try the write next cycle instead of waiting for an edge that
            // may already have fired.
            if let Some(conn) = self.connections.get_mut(&connection) {
                conn.writable = true;
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned by the send API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}
