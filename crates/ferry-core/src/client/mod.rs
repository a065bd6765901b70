//! Client side of the Ferry protocol.
//!
//! [`Client`] owns one connection and performs operations on it one at a
//! time. Outcomes the protocol reports in-band ("file does not exist",
//! "delete cancelled") come back as variants of the per-operation result
//! types; errors are reserved for failures of the connection itself or of
//! local input checked before anything is sent.
//!
//! [`Session`] wraps an optional client with the connect/quit lifecycle the
//! interactive shell needs.

mod session;

pub use session::{Session, SessionState};

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::connection::configure_socket;
use crate::error::{Error, Result};
use crate::protocol::{
    self, DeleteConfirmation, DeleteOutcome, OpCode, UploadReceipt, ACK, SIZE_NOT_FOUND,
};
use crate::store::validate_name;
use crate::transfer::{self, TransferProgress};

/// Outcome of an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResult {
    /// The local file does not exist; the server was told and nothing was sent
    LocalFileMissing,
    /// The server did not acknowledge; carries what it sent instead
    NotReady(String),
    /// The file was sent
    Completed {
        /// What the server reported
        receipt: UploadReceipt,
        /// Size of the local file
        total_size: u64,
        /// Time measured on this side
        local_elapsed: Duration,
    },
}

/// Outcome of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadResult {
    /// The server has no file by that name
    NotFound,
    /// The file was received
    Completed {
        /// Bytes written to the local file
        bytes: u64,
        /// Time from request to last byte
        elapsed: Duration,
        /// Size the server announced
        total: u64,
    },
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteResult {
    /// The server has no file by that name
    NotFound,
    /// The server answered the confirmation
    Completed {
        /// The confirmation that was sent
        reply: ConfirmReply,
        /// The server's outcome text, verbatim
        text: String,
        /// The outcome, if the text was recognised
        outcome: Option<DeleteOutcome>,
    },
    /// The server sent a confirmation code other than 1 or -1
    ServerError(i16),
}

/// The confirmation text sent for a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmReply(String);

impl ConfirmReply {
    /// Confirm the delete.
    #[must_use]
    pub fn yes() -> Self {
        Self("Yes".to_string())
    }

    /// Decline the delete.
    #[must_use]
    pub fn no() -> Self {
        Self("No".to_string())
    }

    /// Build a reply from operator input.
    ///
    /// "yes" and "no" in any case are sent as typed; anything else declines.
    #[must_use]
    pub fn from_input(input: &str) -> Self {
        let input = input.trim();
        if input.eq_ignore_ascii_case("yes") || input.eq_ignore_ascii_case("no") {
            Self(input.to_string())
        } else {
            Self::no()
        }
    }

    /// Whether the server will treat this as a confirmation.
    #[must_use]
    pub fn is_affirmative(&self) -> bool {
        protocol::is_affirmative(&self.0)
    }

    /// The text sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reject names the wire cannot carry before anything is written.
fn check_name(name: &str) -> Result<()> {
    if u16::try_from(name.len()).is_err() {
        return Err(Error::InvalidInput(format!(
            "name is {} bytes, the protocol allows at most {}",
            name.len(),
            u16::MAX
        )));
    }
    Ok(())
}

/// A connection to a Ferry server.
pub struct Client<S = TcpStream> {
    stream: S,
    chunk_size: usize,
}

impl Client<TcpStream> {
    /// Connect to `addr` and perform the CONN handshake.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the server cannot be reached.
    pub async fn connect(addr: SocketAddr, chunk_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("cannot connect to {addr}: {e}")))?;
        configure_socket(&stream)?;
        tracing::debug!("Connected to {}", addr);
        Self::handshake(stream, chunk_size).await
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send CONN over an already open stream.
    pub async fn handshake(mut stream: S, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        protocol::write_opcode(&mut stream, OpCode::Conn).await?;
        Ok(Self { stream, chunk_size })
    }

    /// Upload the file at `path` under its file name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the file is too large for the protocol (the
    /// server is sent the same abort as for a missing file) or its name is
    /// too long (nothing is sent).
    pub async fn upload<F>(&mut self, path: &Path, on_progress: F) -> Result<UploadResult>
    where
        F: FnMut(&TransferProgress),
    {
        let local = match path.file_name() {
            Some(name) => open_local(path)
                .await
                .map(|(file, size)| (name.to_string_lossy().into_owned(), file, size)),
            None => None,
        };

        let Some((name, mut file, size)) = local else {
            tracing::debug!("{} does not exist, sending abort", path.display());
            self.abort_upload().await?;
            return Ok(UploadResult::LocalFileMissing);
        };

        check_name(&name)?;
        let Ok(announced) = u32::try_from(size) else {
            self.abort_upload().await?;
            return Err(Error::InvalidInput(format!(
                "{} is {size} bytes, the protocol allows at most {}",
                path.display(),
                u32::MAX
            )));
        };

        let started = Instant::now();
        protocol::write_opcode(&mut self.stream, OpCode::Upload).await?;
        protocol::write_name(&mut self.stream, name.as_bytes()).await?;
        self.stream.flush().await?;

        let reply = protocol::read_ack(&mut self.stream).await?;
        if reply != ACK {
            let reply = String::from_utf8_lossy(&reply).into_owned();
            tracing::warn!("Server refused {}: {}", name, reply);
            return Ok(UploadResult::NotReady(reply));
        }

        protocol::write_u32(&mut self.stream, announced).await?;
        transfer::send_file(
            &mut self.stream,
            &mut file,
            u64::from(announced),
            self.chunk_size,
            on_progress,
        )
        .await?;

        let receipt = UploadReceipt::read(&mut self.stream).await?;
        tracing::info!(
            "Uploaded {} ({} of {} bytes)",
            name,
            receipt.bytes_received,
            size
        );

        Ok(UploadResult::Completed {
            receipt,
            total_size: size,
            local_elapsed: started.elapsed(),
        })
    }

    /// Tell the server there is nothing to upload.
    async fn abort_upload(&mut self) -> Result<()> {
        protocol::write_opcode(&mut self.stream, OpCode::Upload).await?;
        protocol::write_name(&mut self.stream, b"").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// List the files on the server.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        protocol::write_opcode(&mut self.stream, OpCode::List).await?;

        let count = protocol::read_u32(&mut self.stream).await?;
        let mut names = Vec::with_capacity(usize::try_from(count).map_or(1024, |c| c.min(1024)));
        for _ in 0..count {
            let name = protocol::read_name_bytes(&mut self.stream).await?;
            names.push(String::from_utf8_lossy(&name).into_owned());
        }

        tracing::debug!("Server listed {} file(s)", names.len());
        Ok(names)
    }

    /// Download `name` into `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` without touching the connection if `name` is not
    /// a bare file name. Returns `InvalidInput` if the local file cannot be
    /// created; the incoming bytes are drained first so the connection stays
    /// usable.
    pub async fn download<F>(
        &mut self,
        name: &str,
        dest_dir: &Path,
        on_progress: F,
    ) -> Result<DownloadResult>
    where
        F: FnMut(&TransferProgress),
    {
        validate_name(name)?;
        check_name(name)?;

        let started = Instant::now();
        protocol::write_opcode(&mut self.stream, OpCode::Download).await?;
        protocol::write_name(&mut self.stream, name.as_bytes()).await?;
        self.stream.flush().await?;

        let size = protocol::read_i32(&mut self.stream).await?;
        if size == SIZE_NOT_FOUND {
            return Ok(DownloadResult::NotFound);
        }
        let Ok(total) = u64::try_from(size) else {
            return Err(Error::malformed(
                "download size",
                format!("{size} is negative"),
            ));
        };

        let path = dest_dir.join(name);
        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                transfer::receive_file(
                    &mut self.stream,
                    &mut tokio::io::sink(),
                    total,
                    self.chunk_size,
                    |_| {},
                )
                .await?;
                return Err(Error::InvalidInput(format!(
                    "cannot write {}: {e}",
                    path.display()
                )));
            }
        };

        let summary = transfer::receive_file(
            &mut self.stream,
            &mut file,
            total,
            self.chunk_size,
            on_progress,
        )
        .await?;
        tracing::info!("Downloaded {} ({} bytes)", name, summary.bytes_moved);

        Ok(DownloadResult::Completed {
            bytes: summary.bytes_moved,
            elapsed: started.elapsed(),
            total,
        })
    }

    /// Delete `name` from the server.
    ///
    /// `confirm` is only called if the server has the file; its reply is
    /// sent as the confirmation.
    pub async fn delete<F, Fut>(&mut self, name: &str, confirm: F) -> Result<DeleteResult>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = ConfirmReply>,
    {
        check_name(name)?;

        protocol::write_opcode(&mut self.stream, OpCode::Delete).await?;
        protocol::write_name(&mut self.stream, name.as_bytes()).await?;
        self.stream.flush().await?;

        let code = protocol::read_i16(&mut self.stream).await?;
        match DeleteConfirmation::from_code(code) {
            DeleteConfirmation::NotFound => Ok(DeleteResult::NotFound),
            DeleteConfirmation::ServerError(code) => {
                tracing::warn!("Server answered delete of {} with code {}", name, code);
                Ok(DeleteResult::ServerError(code))
            }
            DeleteConfirmation::Exists => {
                let reply = confirm(name).await;
                protocol::write_message(&mut self.stream, reply.as_str().as_bytes()).await?;

                let text = protocol::read_text(&mut self.stream).await?;
                let outcome = DeleteOutcome::parse(&text);
                tracing::debug!("Delete of {}: {}", name, text);

                Ok(DeleteResult::Completed {
                    reply,
                    text,
                    outcome,
                })
            }
        }
    }

    /// Send QUIT and close the connection.
    pub async fn quit(mut self) -> Result<()> {
        protocol::write_opcode(&mut self.stream, OpCode::Quit).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Open a local regular file with its size, or `None` if there is none.
async fn open_local(path: &Path) -> Option<(File, u64)> {
    let file = File::open(path).await.ok()?;
    let meta = file.metadata().await.ok()?;
    meta.is_file().then(|| (file, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, DuplexStream};

    async fn pair() -> (Client<DuplexStream>, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let client = Client::handshake(client, 1024).await.unwrap();
        let mut conn = [0u8; 4];
        server.read_exact(&mut conn).await.unwrap();
        assert_eq!(&conn, b"CONN");
        (client, server)
    }

    #[test]
    fn test_confirm_reply_from_input() {
        assert_eq!(ConfirmReply::from_input("yes").as_str(), "yes");
        assert_eq!(ConfirmReply::from_input("YES").as_str(), "YES");
        assert_eq!(ConfirmReply::from_input(" No ").as_str(), "No");
        assert_eq!(ConfirmReply::from_input("maybe").as_str(), "No");
        assert_eq!(ConfirmReply::from_input("").as_str(), "No");
        assert!(ConfirmReply::from_input("yEs").is_affirmative());
        assert!(!ConfirmReply::from_input("y").is_affirmative());
    }

    #[tokio::test]
    async fn test_upload_missing_file_sends_abort_shape() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, mut server) = pair().await;

        let result = client
            .upload(&temp_dir.path().join("absent.txt"), |_| {})
            .await
            .unwrap();
        assert_eq!(result, UploadResult::LocalFileMissing);

        drop(client);
        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"UPLD\0\0");
    }

    #[tokio::test]
    async fn test_upload_directory_is_missing() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, _server) = pair().await;

        let result = client.upload(temp_dir.path(), |_| {}).await.unwrap();
        assert_eq!(result, UploadResult::LocalFileMissing);
    }

    #[tokio::test]
    async fn test_upload_not_ready() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        std::fs::write(&path, b"content").unwrap();
        let (mut client, mut server) = pair().await;

        server.write_all(b"NAK").await.unwrap();
        let result = client.upload(&path, |_| {}).await.unwrap();
        assert_eq!(result, UploadResult::NotReady("NAK".to_string()));
    }

    #[tokio::test]
    async fn test_upload_malformed_elapsed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        std::fs::write(&path, b"content").unwrap();
        let (mut client, mut server) = pair().await;

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 4 + 2 + 8 + 4 + 7];
            server.read_exact(&mut request[..4 + 2 + 8]).await.unwrap();
            server.write_all(b"ACK").await.unwrap();
            server.read_exact(&mut request[14..]).await.unwrap();
            let mut reply = 7u32.to_le_bytes().to_vec();
            reply.extend_from_slice(b"soon");
            server.write_all(&reply).await.unwrap();
            server
        });

        let err = client.upload(&path, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Malformed { .. })
        ));
        assert!(err.is_fatal());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_reads_count_then_names() {
        let (mut client, mut server) = pair().await;

        let mut reply = 2u32.to_le_bytes().to_vec();
        for name in [&b"a.txt"[..], b"b.bin"] {
            reply.extend_from_slice(&u16::try_from(name.len()).unwrap().to_le_bytes());
            reply.extend_from_slice(name);
        }
        server.write_all(&reply).await.unwrap();

        let names = client.list().await.unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_download_not_found_reads_nothing_more() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, mut server) = pair().await;

        let mut reply = (-1i32).to_le_bytes().to_vec();
        reply.extend_from_slice(b"LIST");
        server.write_all(&reply).await.unwrap();

        let result = client
            .download("missing.txt", temp_dir.path(), |_| {})
            .await
            .unwrap();
        assert_eq!(result, DownloadResult::NotFound);
        assert!(!temp_dir.path().join("missing.txt").exists());

        // The bytes after the sentinel are still unread.
        let mut stream = client.into_inner();
        let mut rest = [0u8; 4];
        stream.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"LIST");
    }

    #[tokio::test]
    async fn test_download_rejects_path_names_before_sending() {
        let temp_dir = TempDir::new().unwrap();
        let (mut client, mut server) = pair().await;

        let err = client
            .download("../x", temp_dir.path(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
        assert!(!err.is_fatal());

        drop(client);
        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_delete_server_error_code() {
        let (mut client, mut server) = pair().await;
        server.write_all(&7i16.to_le_bytes()).await.unwrap();

        let mut asked = false;
        let result = client
            .delete("x", |_| {
                asked = true;
                async { ConfirmReply::yes() }
            })
            .await
            .unwrap();
        assert_eq!(result, DeleteResult::ServerError(7));
        assert!(!asked, "must not ask for confirmation");
    }

    #[tokio::test]
    async fn test_delete_outcome_upper_case() {
        let (mut client, mut server) = pair().await;

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 4 + 2 + 1];
            server.read_exact(&mut request).await.unwrap();
            server.write_all(&1i16.to_le_bytes()).await.unwrap();
            let mut answer = [0u8; 3];
            server.read_exact(&mut answer).await.unwrap();
            assert_eq!(&answer, b"Yes");
            server.write_all(b"DELETE SUCCESSFUL.").await.unwrap();
            server
        });

        let result = client
            .delete("x", |_| async { ConfirmReply::yes() })
            .await
            .unwrap();
        assert_eq!(
            result,
            DeleteResult::Completed {
                reply: ConfirmReply::yes(),
                text: "DELETE SUCCESSFUL.".to_string(),
                outcome: Some(DeleteOutcome::Successful),
            }
        );
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_closes_stream() {
        let (client, mut server) = pair().await;
        client.quit().await.unwrap();

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"QUIT");
    }
}
