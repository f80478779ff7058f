//! Delimiter-framed transport over a byte stream.
//!
//! # Framing
//!
//! ```text
//! Client                                   Server
//!   |-- <json bytes><delimiter> ------------->|
//!   |<------------- <json bytes><delimiter> --|
//! ```
//!
//! The delimiter is an opaque token agreed out of band. It is neither escaped
//! nor length-prefixed, so payloads must never contain it.

use crate::error::WireError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Delimiter used by the cube server unless configured otherwise.
pub const DEFAULT_DELIMITER: &str = "<???DONE???---";

/// Upper bound on how long a single `receive` may block.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

const READ_CHUNK: usize = 4096;

/// One message read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    payload: String,
    terminated: bool,
}

impl Frame {
    /// The message text with every delimiter removed and whitespace trimmed.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// False if the read deadline or end-of-stream hit before the delimiter.
    ///
    /// A non-terminated frame is still handed out as a normal message.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Parses the payload as JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// A byte stream speaking the delimiter-framed protocol.
///
/// Generic over the stream so tests can run it over in-memory pipes.
pub struct FramedConnection<S = TcpStream> {
    stream: S,
    delimiter: String,
    read_timeout: Duration,
}

impl<S> fmt::Debug for FramedConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection")
            .field("delimiter", &self.delimiter)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl FramedConnection<TcpStream> {
    /// Opens a TCP connection with `TCP_NODELAY` set.
    ///
    /// The connection is NOT authenticated; use `ConnectionConfig::open` for
    /// a command-ready session.
    pub async fn connect(
        addr: &str,
        delimiter: impl Into<String>,
        read_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, WireError> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(WireError::connect(addr, e)),
            Err(_) => {
                return Err(WireError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout_ms: connect_timeout.as_millis() as u64,
                })
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| WireError::connect(addr, e))?;

        Ok(Self::new(stream, delimiter, read_timeout))
    }
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-open stream.
    pub fn new(stream: S, delimiter: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            stream,
            delimiter: delimiter.into(),
            read_timeout,
        }
    }

    /// Returns the delimiter this connection frames with.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Serializes `message` as JSON and writes it followed by the delimiter.
    pub async fn send<M>(&mut self, message: &M) -> Result<(), WireError>
    where
        M: Serialize + ?Sized,
    {
        let mut data = serde_json::to_vec(message)?;
        data.extend_from_slice(self.delimiter.as_bytes());
        self.send_raw(&data).await
    }

    /// Writes raw bytes as-is (no delimiter appended).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.stream.write_all(bytes).await.map_err(WireError::Send)?;
        self.stream.flush().await.map_err(WireError::Send)
    }

    /// Reads until the delimiter shows up anywhere in the accumulated bytes.
    ///
    /// Returns the whole buffer with every delimiter occurrence removed and
    /// surrounding whitespace trimmed. If the read deadline passes or the
    /// peer closes first, the partial buffer is returned as if complete.
    /// A peer that closes or fails before sending a single byte is reported
    /// as `WireError::Receive`.
    pub async fn receive(&mut self) -> Result<Frame, WireError> {
        let deadline = tokio::time::Instant::now() + self.read_timeout;
        let delimiter = self.delimiter.as_bytes();
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        let terminated = loop {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Err(_elapsed) => break false,
                Ok(Ok(0)) => {
                    if buffer.is_empty() {
                        return Err(WireError::Receive(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        )));
                    }
                    break false;
                }
                Ok(Ok(n)) => {
                    // Only the new bytes plus a delimiter-sized overlap can hold a new match
                    let scan_from = buffer.len().saturating_sub(delimiter.len().saturating_sub(1));
                    buffer.extend_from_slice(&chunk[..n]);
                    if contains(&buffer[scan_from..], delimiter) {
                        break true;
                    }
                }
                Ok(Err(e)) => {
                    if buffer.is_empty() {
                        return Err(WireError::Receive(e));
                    }
                    debug!(error = %e, "read error after partial frame");
                    break false;
                }
            }
        };

        if !terminated {
            warn!(
                received = buffer.len(),
                timeout_ms = self.read_timeout.as_millis() as u64,
                "delimiter not seen; returning partial frame"
            );
        }

        let text = String::from_utf8_lossy(&buffer);
        let payload = if self.delimiter.is_empty() {
            text.trim().to_string()
        } else {
            text.replace(&self.delimiter, "").trim().to_string()
        };

        Ok(Frame {
            payload,
            terminated,
        })
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use tokio::io::{duplex, DuplexStream};

    const DELIM: &str = "<???DONE???---";

    fn pipe(read_timeout: Duration) -> (FramedConnection<DuplexStream>, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        (FramedConnection::new(local, DELIM, read_timeout), remote)
    }

    #[tokio::test]
    async fn test_send_appends_delimiter() {
        let (mut conn, mut remote) = pipe(DEFAULT_READ_TIMEOUT);
        conn.send(&json!({ "type": "get_cube_list" })).await.unwrap();
        drop(conn);

        let mut raw = String::new();
        remote.read_to_string(&mut raw).await.unwrap();
        assert_eq!(raw, format!("{}{}", r#"{"type":"get_cube_list"}"#, DELIM));
    }

    #[tokio::test]
    async fn test_receive_strips_every_delimiter_and_trims() {
        let (mut conn, mut remote) = pipe(DEFAULT_READ_TIMEOUT);
        let wire = format!("  {}{{\"cubes\":[]}}\n{}", DELIM, DELIM);
        remote.write_all(wire.as_bytes()).await.unwrap();

        let frame = conn.receive().await.unwrap();
        assert!(frame.is_terminated());
        assert_eq!(frame.payload(), r#"{"cubes":[]}"#);
    }

    #[tokio::test]
    async fn test_receive_delimiter_split_across_writes() {
        let (mut conn, mut remote) = pipe(DEFAULT_READ_TIMEOUT);

        let writer = tokio::spawn(async move {
            remote.write_all(b"{\"position\":[1,2,3]}<???DO").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.write_all(b"NE???---").await.unwrap();
            remote
        });

        let frame = conn.receive().await.unwrap();
        assert!(frame.is_terminated());
        let value: Value = frame.parse().unwrap();
        assert_eq!(value["position"], json!([1, 2, 3]));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_timeout_returns_partial_buffer() {
        let (mut conn, mut remote) = pipe(Duration::from_millis(50));
        remote.write_all(b"{\"position\":[1.0,").await.unwrap();

        let frame = conn.receive().await.unwrap();
        assert!(!frame.is_terminated());
        assert_eq!(frame.payload(), "{\"position\":[1.0,");
        assert!(frame.parse::<Value>().is_err());
        drop(remote);
    }

    #[tokio::test]
    async fn test_receive_eof_returns_partial_buffer() {
        let (mut conn, mut remote) = pipe(DEFAULT_READ_TIMEOUT);
        remote.write_all(b"hello").await.unwrap();
        drop(remote);

        let frame = conn.receive().await.unwrap();
        assert!(!frame.is_terminated());
        assert_eq!(frame.payload(), "hello");
    }

    #[tokio::test]
    async fn test_receive_closed_peer_is_connection_lost() {
        let (mut conn, remote) = pipe(DEFAULT_READ_TIMEOUT);
        drop(remote);

        let err = conn.receive().await.unwrap_err();
        assert!(err.is_connection_lost());
        match err {
            WireError::Receive(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected receive error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_receive_empty_on_silent_peer() {
        let (mut conn, _remote) = pipe(Duration::from_millis(30));
        let frame = conn.receive().await.unwrap();
        assert_eq!(frame.payload(), "");
        assert!(!frame.is_terminated());
    }

    #[tokio::test]
    async fn test_send_receive_between_two_framed_ends() {
        let (a, b) = duplex(64 * 1024);
        let mut client = FramedConnection::new(a, DELIM, DEFAULT_READ_TIMEOUT);
        let mut server = FramedConnection::new(b, DELIM, DEFAULT_READ_TIMEOUT);

        let message = json!({ "type": "apply_force", "force": [-20.0, 0.0, 20.0] });
        client.send(&message).await.unwrap();

        let frame = server.receive().await.unwrap();
        assert_eq!(frame.parse::<Value>().unwrap(), message);
    }

    #[tokio::test]
    async fn test_float_positions_survive_framing_exactly() {
        let (a, b) = duplex(64 * 1024);
        let mut client = FramedConnection::new(a, DELIM, DEFAULT_READ_TIMEOUT);
        let mut server = FramedConnection::new(b, DELIM, DEFAULT_READ_TIMEOUT);

        let position = [1.9247919039688626, -0.1 - 0.2, 1e-300];
        client.send(&json!({ "position": position })).await.unwrap();

        let frame = server.receive().await.unwrap();
        let value: Value = frame.parse().unwrap();
        let parsed: Vec<f64> = value["position"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(parsed, position.to_vec());
    }

    fn payload_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::from),
            prop::collection::vec(any::<f64>().prop_filter("finite", |f| f.is_finite()), 3)
                .prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 _.]{0,24}".prop_map(Value::from),
            prop::collection::vec(-1000i32..1000, 0..4).prop_map(Value::from),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_framing_round_trip(
            message in prop::collection::hash_map("[a-z_]{1,12}", payload_value(), 0..8)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let received = runtime.block_on(async {
                let (a, b) = duplex(64 * 1024);
                let mut client = FramedConnection::new(a, DELIM, DEFAULT_READ_TIMEOUT);
                let mut server = FramedConnection::new(b, DELIM, DEFAULT_READ_TIMEOUT);
                client.send(&message).await.unwrap();
                server.receive().await.unwrap()
            });

            prop_assert!(received.is_terminated());
            let parsed: std::collections::HashMap<String, Value> = received.parse().unwrap();
            prop_assert_eq!(parsed, message);
        }
    }
}
