//! Shared-secret session handshake.

use crate::error::WireError;
use crate::transport::FramedConnection;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Authenticates a freshly opened connection.
///
/// Writes `secret + delimiter` as the very first bytes, then performs one
/// `receive` whose content is discarded. The server has no explicit
/// rejection signal, so a wrong secret only shows up later as failing
/// commands. Must run exactly once per connection, before any command.
///
/// # Returns
/// * `Ok(())` - Secret written; the connection is ready for commands
/// * `Err(WireError::Send)` - The secret could not be written
pub async fn authenticate<S>(conn: &mut FramedConnection<S>, secret: &str) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = Vec::with_capacity(secret.len() + conn.delimiter().len());
    hello.extend_from_slice(secret.as_bytes());
    hello.extend_from_slice(conn.delimiter().as_bytes());
    conn.send_raw(&hello).await?;

    match conn.receive().await {
        Ok(reply) => debug!(
            terminated = reply.is_terminated(),
            bytes = reply.payload().len(),
            "handshake reply discarded"
        ),
        Err(e) => debug!(error = %e, "handshake reply unreadable; continuing"),
    }

    Ok(())
}
