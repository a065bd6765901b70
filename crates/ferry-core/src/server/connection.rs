//! Per-connection state machine.
//!
//! ```text
//! AwaitingHandshake --CONN--> Operating --QUIT / EOF--> Closed
//!        |                      |    ^
//!        |                      +----+  UPLD, LIST, DWLD, DELF, CONN, unknown
//!        +--other / timeout--> Closed (rejected)
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{handlers, ConnectionSettings};
use crate::error::{Error, Result};
use crate::protocol::{self, OpCode, OPCODE_SIZE};
use crate::store::FileStore;

/// How a connection ended without a transport or framing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent QUIT
    Quit,
    /// The client closed the stream between operations
    Disconnected,
    /// The first message was not CONN, or did not arrive in time
    Rejected,
}

fn describe(tag: &[u8; OPCODE_SIZE]) -> String {
    String::from_utf8_lossy(tag).escape_default().to_string()
}

/// Wait for the CONN opcode. Returns `false` if the peer closed first.
async fn await_handshake<S>(stream: &mut S, limit: Duration) -> Result<bool>
where
    S: AsyncRead + Unpin,
{
    let tag = tokio::time::timeout(limit, protocol::read_opcode(stream))
        .await
        .map_err(|_| Error::Timeout(limit))??;

    match tag {
        None => Ok(false),
        Some(tag) if OpCode::from_bytes(&tag) == Some(OpCode::Conn) => Ok(true),
        Some(tag) => Err(Error::HandshakeRejected(format!(
            "expected CONN, got '{}'",
            describe(&tag)
        ))),
    }
}

async fn next_opcode<S>(
    stream: &mut S,
    idle_timeout: Option<Duration>,
) -> Result<Option<[u8; OPCODE_SIZE]>>
where
    S: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, protocol::read_opcode(stream))
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => protocol::read_opcode(stream).await,
    }
}

/// Run one connection from handshake to close.
///
/// # Errors
///
/// Returns the first transport or framing failure; the connection must be
/// dropped afterwards.
pub async fn serve_connection<S>(
    stream: &mut S,
    store: &FileStore,
    settings: &ConnectionSettings,
) -> Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match await_handshake(stream, settings.handshake_timeout).await {
        Ok(true) => tracing::info!("Connection established"),
        Ok(false) => return Ok(SessionEnd::Disconnected),
        Err(e @ (Error::HandshakeRejected(_) | Error::Timeout(_))) => {
            tracing::warn!("Rejecting connection: {}", e);
            return Ok(SessionEnd::Rejected);
        }
        Err(e) => return Err(e),
    }

    loop {
        let Some(tag) = next_opcode(stream, settings.idle_timeout).await? else {
            return Ok(SessionEnd::Disconnected);
        };

        let Some(op) = OpCode::from_bytes(&tag) else {
            tracing::warn!("'{}' is not a valid operation", describe(&tag));
            continue;
        };
        tracing::debug!("Operation {}", op);

        match op {
            OpCode::Conn => tracing::info!("Connection established"),
            OpCode::Upload => {
                handlers::upload(stream, store, settings.chunk_size, settings.transfer_timeout)
                    .await?;
            }
            OpCode::List => handlers::list(stream, store).await?,
            OpCode::Download => handlers::download(stream, store, settings.chunk_size).await?,
            OpCode::Delete => handlers::delete(stream, store).await?,
            OpCode::Quit => return Ok(SessionEnd::Quit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn spawn_connection(
        settings: ConnectionSettings,
    ) -> (
        TempDir,
        DuplexStream,
        tokio::task::JoinHandle<Result<SessionEnd>>,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).await.unwrap();
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve_connection(&mut server, &store, &settings).await });
        (temp_dir, client, task)
    }

    #[tokio::test]
    async fn test_quit_after_handshake() {
        let (_dir, mut client, task) = spawn_connection(ConnectionSettings::default()).await;
        client.write_all(b"CONNQUIT").await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Quit);
    }

    #[tokio::test]
    async fn test_disconnect_before_handshake() {
        let (_dir, client, task) = spawn_connection(ConnectionSettings::default()).await;
        drop(client);
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_non_conn_first_message_rejected() {
        let (_dir, mut client, task) = spawn_connection(ConnectionSettings::default()).await;
        client.write_all(b"LIST").await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Rejected);

        // Nothing was answered.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let settings = ConnectionSettings {
            handshake_timeout: Duration::from_secs(10),
            ..ConnectionSettings::default()
        };
        let (_dir, _client, task) = spawn_connection(settings).await;
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let settings = ConnectionSettings {
            idle_timeout: Some(Duration::from_secs(60)),
            ..ConnectionSettings::default()
        };
        let (_dir, mut client, task) = spawn_connection(settings).await;
        client.write_all(b"CONN").await.unwrap();
        assert!(matches!(task.await.unwrap(), Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_unknown_opcode_and_repeated_conn_are_ignored() {
        let (_dir, mut client, task) = spawn_connection(ConnectionSettings::default()).await;
        client.write_all(b"CONNXXXXCONNLIST").await.unwrap();

        let count = protocol::read_u32(&mut client).await.unwrap();
        assert_eq!(count, 0);

        client.write_all(b"QUIT").await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Quit);
    }

    #[tokio::test]
    async fn test_partial_opcode_is_an_error() {
        let (_dir, mut client, task) = spawn_connection(ConnectionSettings::default()).await;
        client.write_all(b"CONNLI").await.unwrap();
        drop(client);
        assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
    }
}
