//! Configuration for pack orchestration.
//!
//! [`PackConfig`] is usually embedded as a `[pack]` table in a larger TOML
//! document; [`load_config`] and [`save_config`] work with any serde type so
//! callers can define that document themselves.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError, Result};
use crate::fan_out::{self, DEFAULT_CONCURRENCY};
use crate::registry::DEFAULT_FORCED_KEYS;

/// Settings shared by every pack in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    /// Maximum number of source operations in flight per pack operation
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sources loaded by every pack even when they are not members
    #[serde(default = "default_forced_keys")]
    pub forced_keys: Vec<String>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_forced_keys() -> Vec<String> {
    DEFAULT_FORCED_KEYS.iter().map(|k| k.to_string()).collect()
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            forced_keys: default_forced_keys(),
        }
    }
}

impl PackConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(blank) = self.forced_keys.iter().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "forced_keys".to_string(),
                reason: format!("source keys must not be blank (got {blank:?})"),
            });
        }
        Ok(())
    }

    /// Install `concurrency` as the process-wide fan-out limit.
    pub fn apply(&self) {
        fan_out::set_concurrency_limit(self.concurrency);
    }

    /// Load a standalone `PackConfig` document and validate it.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let config: PackConfig = load_config(path).await?;
        config
            .validate()
            .map_err(|cause| config_error(path, "pack", "valid pack settings", cause))?;
        Ok(config)
    }
}

fn config_error(path: &Path, field: &str, expected: &str, cause: ConfigError) -> CoreError {
    CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: field.to_string(),
        expected: expected.to_string(),
        cause,
    }
}

fn io_error<'a>(
    path: &'a Path,
    field: &'a str,
    expected: &'a str,
) -> impl FnOnce(std::io::Error) -> CoreError + 'a {
    move |e| config_error(path, field, expected, ConfigError::Io(e.to_string()))
}

/// Read and parse a TOML document of any shape.
pub async fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(io_error(path, "file", "readable TOML file"))?;

    toml::from_str(&content).map_err(|e| {
        config_error(
            path,
            "content",
            "valid TOML configuration",
            ConfigError::TomlParse(e.to_string()),
        )
    })
}

/// Write `config` as pretty TOML, creating missing parent directories.
pub async fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| {
        config_error(
            path,
            "serialization",
            "serializable config structure",
            ConfigError::TomlSerialize(e.to_string()),
        )
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_error(parent, "directory", "writable directory"))?;
    }

    tokio::fs::write(path, content)
        .await
        .map_err(io_error(path, "file", "writable file location"))
}
