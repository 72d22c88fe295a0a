//! Configuration system for Depot
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/com.depot.depot/config.toml
//! - Linux: ~/.config/depot/config.toml
//! - Windows: %APPDATA%/depot/depot/config/config.toml

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT, FRAME_SIZE, TRANSFER_CHUNK_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and session settings
    pub server: ServerConfig,
    /// Shared directory settings
    pub storage: StorageConfig,
    /// Per-name lock policy
    pub locks: LockConfig,
}

/// Listener and session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: IpAddr,
    /// TCP port
    pub port: u16,
    /// Maximum concurrently served connections
    pub max_connections: usize,
    /// Close a session after this long without receiving anything
    pub idle_timeout_secs: u64,
    /// Upper bound of a single command frame read
    pub frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: 64,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            frame_size: FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Shared directory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every stored file
    pub root: PathBuf,
    /// Buffer size used when streaming file contents
    pub transfer_chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("files"),
            transfer_chunk_size: TRANSFER_CHUNK_SIZE,
        }
    }
}

/// What happens to a name's lock once nobody uses it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eviction {
    /// Drop the entry when no session holds a reference to it
    #[default]
    WhenIdle,
    /// Keep one entry per name ever seen for the life of the process
    Retain,
}

/// Whether queued writers hold back newly arriving readers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fairness {
    /// New readers wait behind a queued writer
    #[default]
    WriterPreferred,
    /// New readers are admitted while a writer waits for readers to drain
    ReaderPreferred,
}

/// Per-name lock configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub eviction: Eviction,
    pub fairness: Fairness,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "depot", "depot")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.frame_size, 4096);
        assert_eq!(config.storage.root, PathBuf::from("files"));
        assert_eq!(config.locks.eviction, Eviction::WhenIdle);
        assert_eq!(config.locks.fairness, Fairness::WriterPreferred);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [server]
            port = 6000

            [locks]
            fairness = "reader_preferred"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.locks.fairness, Fairness::ReaderPreferred);
        // Other values should be defaults
        assert_eq!(config.server.idle_timeout_secs, DEFAULT_IDLE_TIMEOUT_SECS);
        assert_eq!(config.locks.eviction, Eviction::WhenIdle);
    }

    #[test]
    fn test_sample_config() {
        let sample = Config::sample();
        assert!(sample.contains("[server]"));
        assert!(sample.contains("[storage]"));
        assert!(sample.contains("when_idle"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.storage.root = PathBuf::from("/srv/depot");
        config.locks.eviction = Eviction::Retain;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_config_load_missing() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.server.port, 5001);
    }

    #[test]
    fn test_config_load_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
