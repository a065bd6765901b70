//! Config command implementation.

use anyhow::{bail, Result};

use ferry_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load()?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Init { force } => {
            let path = Config::config_path();
            if path.exists() && !force {
                bail!(
                    "{} already exists, use --force to overwrite it",
                    path.display()
                );
            }
            Config::default().save()?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
