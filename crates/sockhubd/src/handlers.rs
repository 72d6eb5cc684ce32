//! Stock event handlers used by the `sockhubd` binary.
//!
//! - [`attach_logging`] logs every event
//! - [`attach_relay`] answers `message` events by echoing or broadcasting

use tracing::info;

use sockhub_core::{Event, EventKind};

use crate::registry::ConnectionRegistry;
use crate::server::Server;

/// What the daemon does with each received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relay {
    /// Only log it
    #[default]
    Off,
    /// Send it back to the connection it came from
    Echo,
    /// Send it to every live connection, sender included
    Broadcast,
}

/// Registers a handler on every event kind that logs the event at info level.
pub fn attach_logging(server: &mut Server) {
    for kind in EventKind::ALL {
        server.on(kind, log_event);
    }
}

fn log_event(_: &mut ConnectionRegistry, event: &Event<'_>) -> anyhow::Result<()> {
    match event {
        Event::Start { host, port } => {
            info!(host = %host, port = port, "start");
        }
        Event::Connect {
            connection,
            remote_addr,
        } => {
            info!(connection = %connection, peer = %remote_addr, "connect");
        }
        Event::Message {
            connection,
            remote_addr,
            data,
        } => {
            info!(
                connection = %connection,
                peer = %remote_addr,
                len = data.len(),
                data = %String::from_utf8_lossy(data),
                "message"
            );
        }
        Event::Disconnect {
            connection,
            remote_addr,
        } => {
            info!(connection = %connection, peer = %remote_addr, "disconnect");
        }
        Event::Error {
            connection,
            remote_addr,
            error,
        } => {
            info!(connection = %connection, peer = %remote_addr, error = %error, "error");
        }
    }
    Ok(())
}

/// Registers the `message` handler for `relay`. Does nothing for [`Relay::Off`].
pub fn attach_relay(server: &mut Server, relay: Relay) {
    match relay {
        Relay::Off => {}
        Relay::Echo => {
            server.on(EventKind::Message, echo);
        }
        Relay::Broadcast => {
            server.on(EventKind::Message, broadcast);
        }
    }
}

fn echo(registry: &mut ConnectionRegistry, event: &Event<'_>) -> anyhow::Result<()> {
    if let Event::Message {
        connection, data, ..
    } = event
    {
        registry.send(*connection, data.to_vec())?;
    }
    Ok(())
}

fn broadcast(registry: &mut ConnectionRegistry, event: &Event<'_>) -> anyhow::Result<()> {
    if let Event::Message { data, .. } = event {
        registry.sendall(data.to_vec());
    }
    Ok(())
}
