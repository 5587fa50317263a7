//! Bridge configuration (bindery.toml / environment)
//!
//! Include directories, libraries to preload and autoload maps are ordered
//! path lists applied once, before the bridge is first used.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding include directories (OS path list)
pub const ENV_INCLUDE_PATH: &str = "BINDERY_INCLUDE_PATH";
/// Environment variable holding libraries to preload (OS path list)
pub const ENV_PRELOAD: &str = "BINDERY_PRELOAD";
/// Environment variable holding autoload maps (OS path list)
pub const ENV_AUTOLOAD_MAPS: &str = "BINDERY_AUTOLOAD_MAPS";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

fn default_true() -> bool {
    true
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Include directories, in search order
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,

    /// Reflection libraries loaded before first use
    #[serde(default)]
    pub preload_libraries: Vec<PathBuf>,

    /// Autoload maps registered before first use
    #[serde(default)]
    pub autoload_maps: Vec<PathBuf>,

    /// Reuse proxies for the same (address, type); disable to make every
    /// returned proxy fresh
    #[serde(default = "default_true")]
    pub identity_map: bool,

    /// Cache converters per type signature
    #[serde(default = "default_true")]
    pub converter_cache: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            preload_libraries: Vec::new(),
            autoload_maps: Vec::new(),
            identity_map: true,
            converter_cache: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the path lists from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var_os(key))
    }

    /// Read the path lists through `lookup` (an environment accessor)
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let paths = |key: &str| -> Vec<PathBuf> {
            lookup(key)
                .map(|value| std::env::split_paths(&value).collect())
                .unwrap_or_default()
        };
        let config = BridgeConfig {
            include_paths: paths(ENV_INCLUDE_PATH),
            preload_libraries: paths(ENV_PRELOAD),
            autoload_maps: paths(ENV_AUTOLOAD_MAPS),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Layer `overlay` on top of `self`: its path entries come first, then
    /// the entries of `self` not already present. Flags come from `overlay`.
    pub fn merge(self, overlay: BridgeConfig) -> BridgeConfig {
        fn layered(base: Vec<PathBuf>, over: Vec<PathBuf>) -> Vec<PathBuf> {
            let mut out = over;
            for path in base {
                if !out.contains(&path) {
                    out.push(path);
                }
            }
            out
        }
        BridgeConfig {
            include_paths: layered(self.include_paths, overlay.include_paths),
            preload_libraries: layered(self.preload_libraries, overlay.preload_libraries),
            autoload_maps: layered(self.autoload_maps, overlay.autoload_maps),
            identity_map: overlay.identity_map && self.identity_map,
            converter_cache: overlay.converter_cache && self.converter_cache,
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lists = [
            ("include_paths", &self.include_paths),
            ("preload_libraries", &self.preload_libraries),
            ("autoload_maps", &self.autoload_maps),
        ];
        for (name, list) in lists {
            if list.iter().any(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "{} contains an empty path",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Write config to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
