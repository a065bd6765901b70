//! # Ferry Core Library
//!
//! `ferry-core` implements Ferry, a minimal remote file-access protocol over
//! TCP: a client connects to a server that exposes one flat directory and can
//! upload, list, download and delete files in it.
//!
//! ## Features
//!
//! - **Small wire format**: 4-byte opcodes, little-endian integers, no frame
//!   header
//! - **Chunked transfers**: files stream in fixed-size chunks with progress
//!   reporting
//! - **Concurrent server**: one task per connection, per-file locking
//! - **Typed outcomes**: "not found" and "cancelled" are results, not errors
//!
//! ## Modules
//!
//! - [`client`] - Client operations and the interactive session state
//! - [`config`] - Configuration management
//! - [`connection`] - Address parsing and socket tuning
//! - [`error`] - Error types
//! - [`protocol`] - Wire protocol primitives
//! - [`server`] - Listener and per-connection state machine
//! - [`store`] - The server's file directory
//! - [`transfer`] - Chunked transfer engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:9000".parse()?, 1024).await?;
//! for name in client.list().await? {
//!     println!("{name}");
//! }
//! client.quit().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;
pub mod transfer;

pub use error::{Error, Result};

use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen and connect host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 9000;

/// Default chunk size for file transfers
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default directory served by `ferry serve`
pub const DEFAULT_STORE_DIR: &str = "SERVER FILES";

/// How long a new connection has to send CONN
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an upload body may go without delivering any bytes
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);
