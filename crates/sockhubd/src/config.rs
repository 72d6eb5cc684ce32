//! Server configuration.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults ([`ServerConfig::default`])
//! 2. An optional TOML file ([`ServerConfig::load`])
//! 3. Environment variables ([`ServerConfig::apply_env`])
//! 4. Command-line flags (applied by the binary)
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 7000
//! backlog = 16
//! read_chunk_size = 4096
//! poll_timeout_ms = 50
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default bind host (all IPv4 interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 6666;

/// Default accept backlog
pub const DEFAULT_BACKLOG: u32 = 5;

/// Bytes read from a client per readiness notification
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Upper bound on one readiness poll, so cancellation is noticed promptly
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Readiness events collected per poll
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Environment variable overriding [`ServerConfig::host`]
pub const ENV_HOST: &str = "SOCKHUB_HOST";

/// Environment variable overriding [`ServerConfig::port`]
pub const ENV_PORT: &str = "SOCKHUB_PORT";

/// Environment variable overriding [`ServerConfig::backlog`]
pub const ENV_BACKLOG: &str = "SOCKHUB_BACKLOG";

/// Listener and loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host name or address to bind
    pub host: String,

    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum pending connections in the accept queue
    pub backlog: u32,

    /// Maximum bytes read per `message` event
    pub read_chunk_size: usize,

    /// Readiness poll timeout in milliseconds
    pub poll_timeout_ms: u64,

    /// Capacity of the readiness event buffer
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Creates a config bound to `host:port` with all other settings default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: None,
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                error,
            },
            other => other,
        })
    }

    /// Applies `SOCKHUB_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies `SOCKHUB_*` overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = parse_var(ENV_PORT, &port)?;
        }
        if let Some(backlog) = lookup(ENV_BACKLOG) {
            self.backlog = parse_var(ENV_BACKLOG, &backlog)?;
        }
        self.validate()
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", "", "a host name or address"));
        }
        if self.backlog == 0 {
            return Err(invalid("backlog", "0", "at least 1"));
        }
        if self.read_chunk_size == 0 {
            return Err(invalid("read_chunk_size", "0", "at least 1"));
        }
        if self.events_capacity == 0 {
            return Err(invalid("events_capacity", "0", "at least 1"));
        }
        Ok(())
    }

    /// Readiness poll timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// `host:port` as configured (before resolution).
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "a non-negative integer in range"))
}

fn invalid(field: &str, value: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

fn source_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

/// Errors that can occur while building a [`ServerConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config{}: {error}", source_suffix(.path))]
    Parse { path: Option<PathBuf>, error: String },

    #[error("Invalid {field}: '{value}' (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}
