//! Per-connection state owned by the registry.

use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Interest;

use sockhub_core::OutboundQueue;

/// A live client connection.
///
/// The `readable`/`writable` flags remember readiness reported by the poll
/// until an operation on the socket reports would-block. The poll is
/// edge-triggered, so these flags are what lets the server do one bounded
/// read or write per cycle without losing notifications.
#[derive(Debug)]
pub struct Connection {
    /// Non-blocking client socket
    pub(crate) stream: TcpStream,

    /// Peer address recorded at accept time
    pub(crate) remote_addr: SocketAddr,

    /// Payloads waiting to be written
    pub(crate) queue: OutboundQueue,

    /// Interest currently registered with the poll
    pub(crate) interest: Interest,

    /// Socket may have unread data
    pub(crate) readable: bool,

    /// Socket may accept more outgoing data
    pub(crate) writable: bool,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
            queue: OutboundQueue::new(),
            interest: Interest::READABLE,
            readable: false,
            writable: false,
        }
    }

    /// Peer address of this connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Number of payloads still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
