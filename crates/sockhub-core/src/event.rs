//! Lifecycle and data events raised by the server.
//!
//! | event        | arguments                                      |
//! |--------------|------------------------------------------------|
//! | `start`      | host, port                                     |
//! | `connect`    | connection, remote address                     |
//! | `message`    | connection, remote address, raw bytes          |
//! | `disconnect` | connection, remote address                     |
//! | `error`      | connection, remote address, underlying error   |

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::connection::ConnectionId;
use crate::error::ParseEventKindError;

/// Name of an event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// The listening socket is bound and polling has begun
    Start,
    /// A client connection was accepted
    Connect,
    /// A chunk of bytes was read from a client
    Message,
    /// A client connection was torn down
    Disconnect,
    /// A socket operation failed without tearing the connection down first
    Error,
}

impl EventKind {
    /// All event kinds, in the order they appear in a connection's life.
    pub const ALL: [EventKind; 5] = [
        EventKind::Start,
        EventKind::Connect,
        EventKind::Message,
        EventKind::Disconnect,
        EventKind::Error,
    ];

    /// Returns the wire name of this event.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Connect => "connect",
            EventKind::Message => "message",
            EventKind::Disconnect => "disconnect",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEventKindError(s.to_string()))
    }
}

/// An event together with its positional arguments.
///
/// Events borrow their payloads from the server for the duration of a
/// dispatch; handlers that need to keep data must copy it.
#[derive(Debug)]
pub enum Event<'a> {
    Start {
        host: &'a str,
        port: u16,
    },
    Connect {
        connection: ConnectionId,
        remote_addr: SocketAddr,
    },
    Message {
        connection: ConnectionId,
        remote_addr: SocketAddr,
        data: &'a [u8],
    },
    Disconnect {
        connection: ConnectionId,
        remote_addr: SocketAddr,
    },
    Error {
        connection: ConnectionId,
        remote_addr: SocketAddr,
        error: &'a io::Error,
    },
}

impl Event<'_> {
    /// Returns the subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start { .. } => EventKind::Start,
            Event::Connect { .. } => EventKind::Connect,
            Event::Message { .. } => EventKind::Message,
            Event::Disconnect { .. } => EventKind::Disconnect,
            Event::Error { .. } => EventKind::Error,
        }
    }

    /// Returns the connection this event concerns, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Event::Start { .. } => None,
            Event::Connect { connection, .. }
            | Event::Message { connection, .. }
            | Event::Disconnect { connection, .. }
            | Event::Error { connection, .. } => Some(*connection),
        }
    }

    /// Returns the remote address of the connection this event concerns, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match self {
            Event::Start { .. } => None,
            Event::Connect { remote_addr, .. }
            | Event::Message { remote_addr, .. }
            | Event::Disconnect { remote_addr, .. }
            | Event::Error { remote_addr, .. } => Some(*remote_addr),
        }
    }
}
