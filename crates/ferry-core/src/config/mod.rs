//! Configuration management for Ferry.
//!
//! This module handles loading, saving, and managing Ferry configuration.
//! Command-line flags override whatever is loaded here.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/ferry/config.toml` |
//! | macOS | `~/Library/Application Support/com.ferry.Ferry/config.toml` |
//! | Windows | `%APPDATA%\ferry\Ferry\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9000
//! root = "SERVER FILES"
//! handshake_timeout = "10s"
//! idle_timeout = "5m"
//!
//! [client]
//! server = "127.0.0.1:9000"
//! download_dir = "."
//!
//! [transfer]
//! chunk_size = 1024
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Ferry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings
    pub server: ServerConfig,
    /// Client settings
    pub client: ClientConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// Server configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory served to clients
    pub root: PathBuf,
    /// How long a new connection has to send CONN
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// How long a connection may sit between operations (None for no limit)
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,
    /// How long an upload may go without delivering any bytes
    #[serde(with = "humantime_serde")]
    pub transfer_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            root: PathBuf::from(crate::DEFAULT_STORE_DIR),
            handshake_timeout: crate::DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
            transfer_timeout: crate::DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}

/// Client configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to connect to, as `host[:port]`
    pub server: String,
    /// Where downloaded files are written
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("{}:{}", crate::DEFAULT_HOST, crate::DEFAULT_PORT),
            download_dir: PathBuf::from("."),
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size for transfers
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text and check it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is unusable.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server or client cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::ConfigError(
                "transfer.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.server.handshake_timeout.is_zero() {
            return Err(Error::ConfigError(
                "server.handshake_timeout must be greater than zero".to_string(),
            ));
        }
        if self.server.transfer_timeout.is_zero() {
            return Err(Error::ConfigError(
                "server.transfer_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = self.to_toml()?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ferry", "Ferry")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    fn parse(s: &str) -> Result<Duration, String> {
        if let Some(secs) = s.strip_suffix('s') {
            return secs
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid seconds '{s}': {e}"));
        }
        if let Some(mins) = s.strip_suffix('m') {
            return mins
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid minutes '{s}': {e}"))?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("minutes out of range '{s}'"));
        }
        Err(format!("invalid duration format '{s}', use e.g. \"10s\" or \"5m\""))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, crate::DEFAULT_PORT);
        assert_eq!(config.server.root, PathBuf::from("SERVER FILES"));
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.server.idle_timeout, None);
        assert_eq!(config.client.server, "127.0.0.1:9000");
        assert_eq!(config.transfer.chunk_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.server.port = 12345;
        original.server.idle_timeout = Some(Duration::from_secs(300));
        original.client.download_dir = PathBuf::from("/tmp/downloads");
        original.transfer.chunk_size = 4096;

        std::fs::write(&config_path, original.to_toml().expect("serialize")).expect("write");

        let loaded_content = std::fs::read_to_string(&config_path).expect("read");
        let loaded = Config::parse(&loaded_content).expect("parse");

        assert_eq!(loaded.server.port, 12345);
        assert_eq!(loaded.server.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(loaded.client.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(loaded.transfer.chunk_size, 4096);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default().to_toml().expect("serialize");

        assert!(toml_str.contains("[server]"), "Should have [server] section");
        assert!(toml_str.contains("[client]"), "Should have [client] section");
        assert!(
            toml_str.contains("[transfer]"),
            "Should have [transfer] section"
        );
        assert!(toml_str.contains("handshake_timeout = \"10s\""));
        assert!(toml_str.contains("transfer_timeout = \"30s\""));
        assert!(!toml_str.contains("idle_timeout"));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[server]
port = 9999
idle_timeout = "5m"
"#;

        let config = Config::parse(partial_toml).expect("parse partial config");

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.idle_timeout, Some(Duration::from_secs(300)));

        assert_eq!(config.server.host, crate::DEFAULT_HOST);
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(Config::parse("[transfer]\nchunk_size = 0\n").is_err());
        assert!(Config::parse("[server]\nhandshake_timeout = \"0s\"\n").is_err());
        assert!(Config::parse("[server]\nhandshake_timeout = \"soon\"\n").is_err());
        assert!(Config::parse("[server]\nport = \"nine\"\n").is_err());
        assert!(Config::parse("[server]\ntransfer_timeout = \"0s\"\n").is_err());
    }

    #[test]
    fn test_config_rejects_overflowing_minutes() {
        let err = Config::parse("[server]\nidle_timeout = \"307445734561825861m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        let config =
            Config::parse("[server]\nidle_timeout = \"307445734561825860m\"\n").unwrap();
        assert_eq!(
            config.server.idle_timeout,
            Some(Duration::from_secs(307_445_734_561_825_860 * 60))
        );
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(
            path.ends_with("config.toml"),
            "Config path should end with config.toml"
        );
    }
}
