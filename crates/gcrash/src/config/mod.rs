//! Configuration loaded from `gcrash.toml`.

mod dump;
mod fault;
mod watchdog;

pub use dump::DumpConfig;
pub use fault::FaultConfig;
pub use watchdog::WatchdogConfig;

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "GCRASH_CONFIG";

/// Default config file location, relative to the server's working directory.
const DEFAULT_CONFIG_PATH: &str = "garrysmod/cfg/gcrash.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcrashConfig {
    pub dump: DumpConfig,
    pub watchdog: WatchdogConfig,
    pub fault: FaultConfig,
}

/// Get the path to the config file.
pub fn config_file_path() -> PathBuf {
    env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from the default location, or return defaults.
pub fn load_config() -> GcrashConfig {
    let path = config_file_path();
    if !path.exists() {
        log::debug!("No config file at {}, using defaults", path.display());
        return GcrashConfig::default();
    }
    load_config_from_path(&path)
}

/// Load configuration from a specific path.
pub fn load_config_from_path(path: &Path) -> GcrashConfig {
    if !path.exists() {
        log::warn!("Config file not found: {:?}", path);
        return GcrashConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Invalid config file {:?}: {}", path, e);
            GcrashConfig::default()
        }),
        Err(e) => {
            log::warn!("Failed to read config file: {}", e);
            GcrashConfig::default()
        }
    }
}
