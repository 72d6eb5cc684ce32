//! Listening socket setup.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

use super::ServerError;
use crate::config::ServerConfig;

/// The bound listening socket and its readiness level.
#[derive(Debug)]
pub(crate) struct Listener {
    pub(crate) socket: TcpListener,
    pub(crate) local_addr: SocketAddr,
    /// Pending connections may be waiting in the accept queue
    pub(crate) ready: bool,
}

/// Resolves the configured host and binds a non-blocking listener with
/// `SO_REUSEADDR` and the configured backlog.
pub(crate) fn bind(config: &ServerConfig) -> Result<Listener, ServerError> {
    let addr = resolve(config)?;
    let setup = |stage: &'static str| {
        move |source: io::Error| ServerError::SocketSetup {
            addr: addr.to_string(),
            stage,
            source,
        }
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(setup("create socket"))?;
    socket
        .set_reuse_address(true)
        .map_err(setup("set SO_REUSEADDR"))?;
    socket.set_nonblocking(true).map_err(setup("set non-blocking"))?;
    socket.bind(&addr.into()).map_err(setup("bind"))?;

    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(setup("listen"))?;

    let socket = TcpListener::from_std(socket.into());
    let local_addr = socket.local_addr().map_err(setup("read local address"))?;

    Ok(Listener {
        socket,
        local_addr,
        ready: false,
    })
}

fn resolve(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
    let resolution_failed = |source: io::Error| ServerError::AddressResolution {
        addr: config.bind_address(),
        source,
    };

    (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(resolution_failed)?
        .next()
        .ok_or_else(|| {
            resolution_failed(io::Error::new(
                io::ErrorKind::NotFound,
                "host resolved to no addresses",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind(&ServerConfig::new("127.0.0.1", 0)).unwrap();
        assert!(listener.local_addr.ip().is_loopback());
        assert_ne!(listener.local_addr.port(), 0);
        assert!(!listener.ready);
    }

    #[test]
    fn test_bind_port_in_use_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(&ServerConfig::new("127.0.0.1", port)).unwrap_err();
        match err {
            ServerError::SocketSetup { stage, ref addr, .. } => {
                assert_eq!(stage, "bind");
                assert!(addr.ends_with(&port.to_string()));
            }
            other => panic!("Expected SocketSetup, got {other:?}"),
        }
    }
}
