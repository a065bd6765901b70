//! Ferry CLI - minimal remote file access over TCP
//!
//! One side serves a directory, the other connects and moves files in and
//! out of it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve ./SERVER FILES on 127.0.0.1:9000
//! ferry serve
//!
//! # Connect interactively (type CONN, then UPLD, LIST, DWLD, DELF, QUIT)
//! ferry shell --server 127.0.0.1:9000
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Shell(args) => commands::shell::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ferry=info,ferry_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
