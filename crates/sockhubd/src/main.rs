//! sockhub daemon - single-threaded TCP connection multiplexer
//!
//! Listens on a TCP port, logs every connection lifecycle event and
//! optionally echoes or broadcasts what clients send.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 0.0.0.0:6666 and log events
//! sockhubd
//!
//! # Echo every message back to its sender
//! sockhubd --port 7000 --echo
//!
//! # Relay every message to all clients, settings from a file
//! sockhubd --config sockhub.toml --broadcast
//!
//! # Override through the environment
//! SOCKHUB_PORT=7000 sockhubd
//!
//! # Enable debug logging
//! RUST_LOG=sockhubd=debug sockhubd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, every client gets a `disconnect`

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sockhubd::handlers::{attach_logging, attach_relay};
use sockhubd::{Relay, Server, ServerConfig};

/// sockhub daemon - TCP connection multiplexer with lifecycle events
#[derive(Parser, Debug)]
#[command(name = "sockhubd", version, about)]
struct Args {
    /// Host name or address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum pending connections in the accept queue
    #[arg(long)]
    backlog: Option<u32>,

    /// TOML file with server settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send every message back to its sender
    #[arg(long, conflicts_with = "broadcast")]
    echo: bool,

    /// Send every message to all connected clients
    #[arg(long)]
    broadcast: bool,
}

impl Args {
    fn relay(&self) -> Relay {
        if self.echo {
            Relay::Echo
        } else if self.broadcast {
            Relay::Broadcast
        } else {
            Relay::Off
        }
    }
}

/// Builds the effective config: defaults, then file, then environment,
/// then command line flags.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    config
        .apply_env()
        .context("Invalid SOCKHUB_* environment override")?;

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backlog) = args.backlog {
        config.backlog = backlog;
    }

    config.validate().context("Invalid command line option")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sockhubd=info".parse()?)
                .add_directive("sockhub_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "sockhub daemon starting"
    );

    let config = load_config(&args)?;
    let relay = args.relay();

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut server = Server::new(config, cancel_token).context("Failed to create server")?;
    attach_logging(&mut server);
    attach_relay(&mut server, relay);

    info!(
        addr = %server.config().bind_address(),
        relay = ?relay,
        "Starting server"
    );

    // The loop blocks on the OS poll, keep it off the async workers
    let result = tokio::task::spawn_blocking(move || server.run())
        .await
        .context("Server task panicked")?;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("sockhub daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["sockhubd"]);
        assert_eq!(args.relay(), Relay::Off);
        assert!(args.port.is_none());
    }

    #[test]
    fn test_echo_conflicts_with_broadcast() {
        assert!(Args::try_parse_from(["sockhubd", "--echo", "--broadcast"]).is_err());
        assert_eq!(
            Args::parse_from(["sockhubd", "--broadcast"]).relay(),
            Relay::Broadcast
        );
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sockhub.toml");
        std::fs::write(&path, "host = \"127.0.0.1\"\nport = 7000\nbacklog = 16\n").unwrap();

        let args = Args::parse_from([
            "sockhubd",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7100",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7100);
        assert_eq!(config.backlog, 16);
    }

    #[test]
    fn test_zero_backlog_flag_rejected() {
        let args = Args::parse_from(["sockhubd", "--backlog", "0"]);
        assert!(load_config(&args).is_err());
    }
}
