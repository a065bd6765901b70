//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands to load the user's configuration.
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> ferry_core::config::Config {
    ferry_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        ferry_core::config::Config::default()
    })
}

pub mod config;
pub mod serve;
pub mod shell;

/// Ferry - minimal remote file access over TCP
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Serve a directory to Ferry clients
    Serve(ServeArgs),

    /// Connect to a server with an interactive prompt
    Shell(ShellArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "FERRY_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "FERRY_PORT")]
    pub port: Option<u16>,

    /// Directory to serve (created if missing)
    #[arg(short, long)]
    pub root: Option<PathBuf>,
}

/// Arguments for the shell command
#[derive(Parser)]
pub struct ShellArgs {
    /// Server to connect to, as HOST[:PORT]
    #[arg(short, long, env = "FERRY_SERVER")]
    pub server: Option<String>,

    /// Directory downloaded files are written to
    #[arg(short, long)]
    pub download_dir: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["ferry", "serve", "--port", "9100", "--root", "/srv/files"]);
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.port, Some(9100));
                assert_eq!(args.root, Some(PathBuf::from("/srv/files")));
            }
            _ => panic!("Expected serve"),
        }
    }

    #[test]
    fn test_parse_config_init() {
        let cli = Cli::parse_from(["ferry", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { force: true }
            })
        ));
    }
}
