//! Error types for the Construct wire layer.

use thiserror::Error;

/// Errors that can occur while talking to the cube server.
///
/// Receive timeouts are deliberately absent: a read that never sees the
/// delimiter returns its partial buffer (see `FramedConnection::receive`).
#[derive(Debug, Error)]
pub enum WireError {
    /// TCP connect failed (refused, unreachable, bad address)
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete in time
    #[error("Connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    /// Writing a frame failed (connection reset, closed, etc.)
    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Reading failed before a single byte arrived
    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// Message could not be encoded as JSON
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl WireError {
    /// Creates a connect error for the given address.
    pub fn connect(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            addr: addr.into(),
            source,
        }
    }

    /// Returns true if the error means the underlying stream is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Send(_) | Self::Receive(_))
    }
}
