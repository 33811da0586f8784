//! Configuration file support for fusioniap.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FUSIONIAP_*)
//! 3. Local config file (./fusioniap.toml)
//! 4. Global config file (~/.config/fusioniap/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// I2C bus number the device hangs off (`/dev/i2c-N`).
    pub bus: Option<u8>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new("fusioniap.toml")) {
            debug!("loaded local config from fusioniap.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from an explicit path only.
    pub fn load_from_path(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_else(|| {
            warn!("could not read config file {}", path.display());
            Self::default()
        })
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("ignoring malformed config {}: {e}", path.display());
                None
            }
        }
    }

    fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "fusioniap").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay `other` on top of this config.
    fn merge(&mut self, other: Self) {
        if other.connection.bus.is_some() {
            self.connection.bus = other.connection.bus;
        }
    }
}
