//! Common test utilities for Ferry integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use ferry_core::server::{ConnectionSettings, Server};
use ferry_core::store::FileStore;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    /// Address clients connect to
    pub addr: SocketAddr,
    /// Directory being served
    pub root: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ferry_core::Result<()>>>,
}

impl TestServer {
    /// Serve `root` with default settings.
    pub async fn start(root: &Path) -> Self {
        Self::start_with(root, ConnectionSettings::default()).await
    }

    /// Serve `root` with the given settings.
    pub async fn start_with(root: &Path, settings: ConnectionSettings) -> Self {
        let store = FileStore::open(root).await.expect("Failed to open store");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let server = Server::from_parts(listener, store, settings);
        let addr = server.local_addr().expect("Failed to get local address");
        let root = server.store().root().to_path_buf();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            root,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Stop accepting and wait for the server to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("Server did not stop")
                .expect("Server task panicked")
                .expect("Server failed");
        }
    }
}
