//! The structured configuration the core consumes, and a TOML loader for
//! it. CLI flag parsing that overrides or supplies these values is an
//! external collaborator.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::From;
use serde::Deserialize;

/// Failure loading a [`ServerConfig`] from disk.
#[derive(Debug, From)]
pub enum ConfigError {
    /// The config file could not be read.
    #[from(ignore)]
    Io(std::io::Error),
    /// The file's contents are not valid TOML, or don't match the expected
    /// shape.
    #[from(ignore)]
    Deserialize(toml::de::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Deserialize(value)
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The on-disk shape of a [`ServerConfig`]. Durations are expressed in
/// milliseconds since TOML has no native duration type.
#[derive(Debug, Deserialize)]
struct RawServerConfig {
    bind_ip: IpAddr,
    port: u16,
    tls_cert_path: PathBuf,
    tls_key_path: PathBuf,
    static_root: PathBuf,
    sse_reconnect_delay_ms: Option<u64>,
    sse_heartbeat_interval_ms: Option<u64>,
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default)]
    production: bool,
}

fn default_capacity() -> usize {
    256
}

/// Configuration for a [`crate::Server`] instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_ip: IpAddr,
    /// Port to bind the listener to.
    pub port: u16,
    /// Path to the PEM-encoded certificate chain.
    pub tls_cert_path: PathBuf,
    /// Path to the PEM-encoded private key.
    pub tls_key_path: PathBuf,
    /// Root directory static-file responses are served relative to.
    pub static_root: PathBuf,
    /// Reconnect delay advertised to SSE clients via `retry:`. Negative
    /// suppresses the directive entirely.
    pub sse_reconnect_delay: Option<Duration>,
    /// SSE heartbeat interval. `None` disables heartbeats.
    pub sse_heartbeat_interval: Option<Duration>,
    /// Maximum number of concurrently in-flight executor tasks.
    pub capacity: usize,
    /// Whether the server is running in production mode, gating the
    /// verbosity of error responses.
    pub production: bool,
}

impl ServerConfig {
    /// The listener's bind address as `ip:port`.
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_ip, self.port)
    }

    /// Parses a config from TOML text.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawServerConfig = toml::from_str(input)?;
        Ok(Self {
            bind_ip: raw.bind_ip,
            port: raw.port,
            tls_cert_path: raw.tls_cert_path,
            tls_key_path: raw.tls_key_path,
            static_root: raw.static_root,
            sse_reconnect_delay: raw.sse_reconnect_delay_ms.map(Duration::from_millis),
            sse_heartbeat_interval: raw.sse_heartbeat_interval_ms.map(Duration::from_millis),
            capacity: raw.capacity,
            production: raw.production,
        })
    }

    /// Reads and parses a config file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
