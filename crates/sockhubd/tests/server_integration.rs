//! Integration tests for the TCP server.
//!
//! These tests run the full readiness loop on a blocking task and talk to it
//! over real TCP connections, covering echo, broadcast, lifecycle events,
//! chunked reads and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use sockhub_core::{Event, EventKind};
use sockhubd::handlers::attach_relay;
use sockhubd::{ConnectionRegistry, Relay, Server, ServerConfig, ServerError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single network round trip in these tests
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client waits before concluding nothing is coming
const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// A server running on a blocking task, plus the events it raised.
struct TestServer {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    events: mpsc::UnboundedReceiver<String>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn spawn(relay: Relay) -> Self {
        Self::spawn_with(test_config(), relay).await
    }

    async fn spawn_with(config: ServerConfig, relay: Relay) -> Self {
        let cancel_token = CancellationToken::new();
        let mut server = Server::new(config, cancel_token.clone()).expect("create server");

        let (tx, events) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            server.on(kind, move |_: &mut ConnectionRegistry, event: &Event<'_>| {
                let _ = tx.send(describe(event));
                Ok(())
            });
        }
        attach_relay(&mut server, relay);

        let addr = server.initialize().expect("bind server");
        let handle = tokio::task::spawn_blocking(move || server.run());

        TestServer {
            addr,
            cancel_token,
            events,
            handle,
        }
    }

    async fn connect(&self) -> TcpStream {
        timeout(IO_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .expect("connect timed out")
            .expect("connect to server")
    }

    /// Waits for the next event whose description starts with `prefix`.
    async fn next_event(&mut self, prefix: &str) -> String {
        timeout(IO_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if event.starts_with(prefix) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no '{prefix}' event within {IO_TIMEOUT:?}"))
    }

    /// Cancels the loop and waits for it to return.
    async fn shutdown(self) -> (Result<(), ServerError>, Vec<String>) {
        let TestServer {
            cancel_token,
            mut events,
            handle,
            ..
        } = self;

        cancel_token.cancel();
        let result = timeout(IO_TIMEOUT, handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked");

        let mut rest = Vec::new();
        while let Ok(event) = events.try_recv() {
            rest.push(event);
        }
        (result, rest)
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        backlog: 128,
        poll_timeout_ms: 10,
        ..ServerConfig::new("127.0.0.1", 0)
    }
}

fn describe(event: &Event<'_>) -> String {
    match event {
        Event::Start { port, .. } => format!("start {port}"),
        Event::Connect { connection, .. } => format!("connect {connection}"),
        Event::Message {
            connection, data, ..
        } => format!("message {connection} {}", String::from_utf8_lossy(data)),
        Event::Disconnect { connection, .. } => format!("disconnect {connection}"),
        Event::Error {
            connection, error, ..
        } => format!("error {connection} {error}"),
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read from server");
    buf
}

async fn assert_nothing_to_read(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let result = timeout(QUIET_PERIOD, stream.read(&mut buf)).await;
    assert!(result.is_err(), "unexpected data: {result:?}");
}

// ============================================================================
// Echo
// ============================================================================

#[tokio::test]
async fn test_echo_round_trip() {
    let mut server = TestServer::spawn(Relay::Echo).await;
    let mut client = server.connect().await;
    server.next_event("connect").await;

    client.write_all(b"hello").await.unwrap();
    assert_eq!(read_exactly(&mut client, 5).await, b"hello");

    client.write_all(b"again").await.unwrap();
    assert_eq!(read_exactly(&mut client, 5).await, b"again");

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_echo_large_message_is_chunked() {
    let config = ServerConfig {
        read_chunk_size: 1024,
        ..test_config()
    };
    let mut server = TestServer::spawn_with(config, Relay::Echo).await;
    let mut client = server.connect().await;
    server.next_event("connect").await;

    let payload: Vec<u8> = (0..64 * 1024).map(|i| b'a' + (i % 26) as u8).collect();
    let (mut reader, mut writer) = client.split();

    let (written, echoed) = tokio::join!(writer.write_all(&payload), async {
        let mut buf = vec![0; payload.len()];
        timeout(IO_TIMEOUT, reader.read_exact(&mut buf))
            .await
            .expect("echo timed out")
            .expect("read echo");
        buf
    });
    written.unwrap();
    assert_eq!(echoed, payload);

    // Reads are bounded, so one write shows up as many message events
    let mut messages = 0;
    while let Ok(event) = server.events.try_recv() {
        if event.starts_with("message") {
            messages += 1;
        }
    }
    assert!(messages >= 2, "expected several chunks, got {messages}");

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_echo_many_clients() {
    let mut server = TestServer::spawn(Relay::Echo).await;

    let mut clients = Vec::new();
    for _ in 0..20 {
        clients.push(server.connect().await);
    }
    for _ in 0..20 {
        server.next_event("connect").await;
    }

    for (i, client) in clients.iter_mut().enumerate() {
        client.write_all(format!("client-{i:02}").as_bytes()).await.unwrap();
    }
    for (i, client) in clients.iter_mut().enumerate() {
        let echoed = read_exactly(client, 9).await;
        assert_eq!(echoed, format!("client-{i:02}").as_bytes());
    }

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_all_clients() {
    let mut server = TestServer::spawn(Relay::Broadcast).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let mut c = server.connect().await;
    for _ in 0..3 {
        server.next_event("connect").await;
    }

    b.write_all(b"news").await.unwrap();

    assert_eq!(read_exactly(&mut a, 4).await, b"news");
    assert_eq!(read_exactly(&mut b, 4).await, b"news");
    assert_eq!(read_exactly(&mut c, 4).await, b"news");

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_relay_off_sends_nothing() {
    let mut server = TestServer::spawn(Relay::Off).await;
    let mut client = server.connect().await;
    server.next_event("connect").await;

    client.write_all(b"quiet").await.unwrap();
    assert_eq!(server.next_event("message").await, "message conn-1 quiet");
    assert_nothing_to_read(&mut client).await;

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

// ============================================================================
// Lifecycle Events
// ============================================================================

#[tokio::test]
async fn test_start_event_reports_bound_port() {
    let mut server = TestServer::spawn(Relay::Off).await;
    let start = server.next_event("start").await;
    assert_eq!(start, format!("start {}", server.addr.port()));

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_connect_message_disconnect_sequence() {
    let mut server = TestServer::spawn(Relay::Off).await;
    server.next_event("start").await;

    let mut client = server.connect().await;
    assert_eq!(server.next_event("connect").await, "connect conn-1");

    client.write_all(b"hi").await.unwrap();
    assert_eq!(server.next_event("message").await, "message conn-1 hi");

    drop(client);
    assert_eq!(server.next_event("disconnect").await, "disconnect conn-1");

    let (result, rest) = server.shutdown().await;
    assert!(result.is_ok());
    assert!(
        !rest.iter().any(|e| e.starts_with("disconnect")),
        "disconnect reported twice: {rest:?}"
    );
}

#[tokio::test]
async fn test_connection_ids_increase() {
    let mut server = TestServer::spawn(Relay::Off).await;

    let first = server.connect().await;
    assert_eq!(server.next_event("connect").await, "connect conn-1");
    drop(first);
    server.next_event("disconnect").await;

    let _second = server.connect().await;
    assert_eq!(server.next_event("connect").await, "connect conn-2");

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let mut server = TestServer::spawn(Relay::Off).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    for _ in 0..2 {
        server.next_event("connect").await;
    }

    let (result, rest) = server.shutdown().await;
    assert!(result.is_ok());
    assert_eq!(
        rest.iter().filter(|e| e.starts_with("disconnect")).count(),
        2,
        "events after shutdown: {rest:?}"
    );

    // Both sockets were closed by the server
    for client in [&mut a, &mut b] {
        let mut buf = [0u8; 8];
        let n = timeout(IO_TIMEOUT, client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}

#[tokio::test]
async fn test_server_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sockhub.toml");
    std::fs::write(
        &path,
        "host = \"127.0.0.1\"\nport = 0\nbacklog = 8\nread_chunk_size = 16\npoll_timeout_ms = 5\n",
    )
    .unwrap();

    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.read_chunk_size, 16);

    let mut server = TestServer::spawn_with(config, Relay::Echo).await;
    let mut client = server.connect().await;
    server.next_event("connect").await;

    client.write_all(b"from a config file").await.unwrap();
    assert_eq!(read_exactly(&mut client, 18).await, b"from a config file");

    let (result, _) = server.shutdown().await;
    assert!(result.is_ok());
}
