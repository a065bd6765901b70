//! The Ferry server.
//!
//! [`Server`] accepts TCP connections and runs each one on its own task.
//! Within a connection, operations are strictly sequential; across
//! connections, the [`FileStore`] locks keep per-file check-then-act
//! sequences atomic.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::config::Config;
//! use ferry_core::server::Server;
//!
//! let server = Server::bind(&Config::default()).await?;
//! println!("Listening on {}", server.local_addr()?);
//! server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

pub mod connection;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::connection::configure_socket;
use crate::error::{Error, Result};
use crate::store::FileStore;

pub use connection::{serve_connection, SessionEnd};

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// How long a new connection has to send CONN
    pub handshake_timeout: Duration,
    /// How long a connection may wait between operations
    pub idle_timeout: Option<Duration>,
    /// How long an upload body may stall while its name is locked
    pub transfer_timeout: Duration,
    /// Chunk size for file transfers
    pub chunk_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: crate::DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
            transfer_timeout: crate::DEFAULT_TRANSFER_TIMEOUT,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ConnectionSettings {
    /// Settings taken from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake_timeout: config.server.handshake_timeout,
            idle_timeout: config.server.idle_timeout,
            transfer_timeout: config.server.transfer_timeout,
            chunk_size: config.transfer.chunk_size,
        }
    }
}

/// A listening Ferry server.
pub struct Server {
    /// TCP listener for incoming connections
    listener: TcpListener,
    /// Directory served to clients
    store: FileStore,
    /// Limits applied to every connection
    settings: ConnectionSettings,
}

impl Server {
    /// Open the store and bind the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created or the
    /// address cannot be bound.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(&config.server.root).await?;

        let host = config.server.host.as_str();
        let port = config.server.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Connection(format!("cannot listen on {host}:{port}: {e}")))?;

        Ok(Self::from_parts(
            listener,
            store,
            ConnectionSettings::from_config(config),
        ))
    }

    /// Serve `store` on an already bound listener.
    #[must_use]
    pub fn from_parts(listener: TcpListener, store: FileStore, settings: ConnectionSettings) -> Self {
        Self {
            listener,
            store,
            settings,
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The store being served.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Accept connections until the process ends.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections still open at that point are aborted.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Serving {} on {}",
            self.store.root().display(),
            self.local_addr()?
        );

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutting down, {} connection(s) open", connections.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let store = self.store.clone();
                        let settings = self.settings;
                        connections.spawn(handle_connection(stream, peer_addr, store, settings));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    store: FileStore,
    settings: ConnectionSettings,
) {
    tracing::info!("Connection from {}", peer_addr);

    if let Err(e) = configure_socket(&stream) {
        tracing::warn!("Failed to configure socket for {}: {}", peer_addr, e);
    }

    match serve_connection(&mut stream, &store, &settings).await {
        Ok(SessionEnd::Quit) => tracing::info!("{} quit", peer_addr),
        Ok(SessionEnd::Disconnected) => tracing::info!("{} disconnected", peer_addr),
        Ok(SessionEnd::Rejected) => tracing::info!("Closed rejected connection from {}", peer_addr),
        Err(e) => tracing::warn!("Connection from {} ended: {}", peer_addr, e),
    }
}
