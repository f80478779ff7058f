//! Connection parameters shared by every session with the cube server.

use crate::error::WireError;
use crate::handshake::authenticate;
use crate::transport::{FramedConnection, DEFAULT_DELIMITER, DEFAULT_READ_TIMEOUT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Where the server lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `host:port` of the cube server
    pub server_addr: String,

    /// Shared secret sent as the first frame of every connection
    pub auth_pass: String,

    /// Frame delimiter
    pub delimiter: String,

    /// Deadline for a single receive, in milliseconds
    pub read_timeout_ms: u64,

    /// Deadline for TCP connect, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_addr: std::env::var("CONSTRUCT_SERVER")
                .unwrap_or_else(|_| "127.0.0.1:14000".to_string()),
            auth_pass: std::env::var("CONSTRUCT_SECRET").unwrap_or_default(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    /// Creates a config for the given server and secret with default framing.
    pub fn new(server_addr: impl Into<String>, auth_pass: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            auth_pass: auth_pass.into(),
            ..Default::default()
        }
    }

    /// Sets the delimiter.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets the receive deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Returns the receive deadline.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Returns the connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connects and authenticates, returning a command-ready connection.
    pub async fn open(&self) -> Result<FramedConnection, WireError> {
        let mut conn = FramedConnection::connect(
            &self.server_addr,
            self.delimiter.clone(),
            self.read_timeout(),
            self.connect_timeout(),
        )
        .await?;

        authenticate(&mut conn, &self.auth_pass).await?;
        debug!(addr = %self.server_addr, "session opened");
        Ok(conn)
    }
}
