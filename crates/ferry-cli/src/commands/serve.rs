//! Serve command implementation.

use anyhow::{Context, Result};

use ferry_core::server::Server;

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.root {
        config.server.root = root;
    }

    let server = Server::bind(&config)
        .await
        .context("Failed to start server")?;
    let addr = server.local_addr()?;

    println!();
    println!("Ferry v{}", ferry_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Serving:   {}", server.store().root().display());
    println!("  Listening: {}", addr);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!("  Server stopped.");
    Ok(())
}
