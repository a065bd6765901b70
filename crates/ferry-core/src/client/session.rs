//! Client session lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;

use super::{Client, ConfirmReply, DeleteResult, DownloadResult, UploadResult};
use crate::error::{Error, Result};
use crate::transfer::TransferProgress;

/// Where a [`Session`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection; only `connect` and `quit` are possible
    Disconnected,
    /// Connected and ready for operations
    Connected,
    /// QUIT was issued; the session is over
    Closed,
}

/// An interactive client session.
///
/// Holds at most one connection. A failure that leaves the connection in an
/// unknown state drops it and the session returns to
/// [`SessionState::Disconnected`].
pub struct Session {
    client: Option<Client>,
    chunk_size: usize,
    closed: bool,
}

impl Session {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            client: None,
            chunk_size,
            closed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.client.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Connect to `addr`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` if a connection is open, `SessionClosed`
    /// after `quit`, or the connection failure.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        match self.state() {
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Connected => return Err(Error::AlreadyConnected),
            SessionState::Disconnected => {}
        }

        let client = Client::connect(addr, self.chunk_size).await?;
        tracing::info!("Connection established with {}", addr);
        self.client = Some(client);
        Ok(())
    }

    fn client(&mut self) -> Result<&mut Client> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        self.client.as_mut().ok_or(Error::NotConnected)
    }

    /// Drop the connection if `result` left it unusable.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.client.take().is_some() {
                tracing::warn!("Connection dropped: {}", e);
            }
        }
        result
    }

    /// Upload a local file. See [`Client::upload`].
    pub async fn upload<F>(&mut self, path: &Path, on_progress: F) -> Result<UploadResult>
    where
        F: FnMut(&TransferProgress),
    {
        let result = self.client()?.upload(path, on_progress).await;
        self.settle(result)
    }

    /// List the server's files. See [`Client::list`].
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let result = self.client()?.list().await;
        self.settle(result)
    }

    /// Download a file. See [`Client::download`].
    pub async fn download<F>(
        &mut self,
        name: &str,
        dest_dir: &Path,
        on_progress: F,
    ) -> Result<DownloadResult>
    where
        F: FnMut(&TransferProgress),
    {
        let result = self.client()?.download(name, dest_dir, on_progress).await;
        self.settle(result)
    }

    /// Delete a file. See [`Client::delete`].
    pub async fn delete<F, Fut>(&mut self, name: &str, confirm: F) -> Result<DeleteResult>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = ConfirmReply>,
    {
        let result = self.client()?.delete(name, confirm).await;
        self.settle(result)
    }

    /// End the session, sending QUIT if connected.
    ///
    /// Calling it again is a no-op.
    pub async fn quit(&mut self) -> Result<()> {
        self.closed = true;
        match self.client.take() {
            Some(client) => client.quit().await,
            None => Ok(()),
        }
    }

    /// End the session without sending QUIT.
    ///
    /// For when an operation was interrupted and the server may still be
    /// mid-exchange; closing the stream is the only safe signal.
    pub fn close(&mut self) {
        self.closed = true;
        if self.client.take().is_some() {
            tracing::debug!("Connection closed without QUIT");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut session = Session::new(1024);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.list().await, Err(Error::NotConnected)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sent = Vec::new();
            stream.read_to_end(&mut sent).await.unwrap();
            sent
        });

        let mut session = Session::new(1024);
        session.connect(addr).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(matches!(
            session.connect(addr).await,
            Err(Error::AlreadyConnected)
        ));

        session.quit().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.list().await, Err(Error::SessionClosed)));
        assert!(matches!(
            session.connect(addr).await,
            Err(Error::SessionClosed)
        ));
        session.quit().await.unwrap();

        assert_eq!(peer.await.unwrap(), b"CONNQUIT");
    }

    #[tokio::test]
    async fn test_fatal_error_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept, read the handshake and the LIST request, then hang up.
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 8];
            stream.read_exact(&mut request).await.unwrap();
            request
        });

        let mut session = Session::new(1024);
        session.connect(addr).await.unwrap();
        let err = session.list().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(&peer.await.unwrap(), b"CONNLIST");
    }

    #[tokio::test]
    async fn test_close_without_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sent = Vec::new();
            stream.read_to_end(&mut sent).await.unwrap();
            sent
        });

        let mut session = Session::new(1024);
        session.connect(addr).await.unwrap();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(peer.await.unwrap(), b"CONN");
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = Session::new(1024);
        assert!(matches!(
            session.connect(addr).await,
            Err(Error::Connection(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
