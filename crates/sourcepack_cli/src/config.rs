//! CLI configuration document.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sourcepack_core::config::{load_config, save_config};
use sourcepack_core::{ConfigError, CoreError, PackConfig, Result};

/// Delay given to forced sources that have no `[[sources]]` entry.
pub const FORCED_SOURCE_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub pack: PackConfig,

    #[serde(default)]
    pub sources: Vec<SimulatedSourceConfig>,
}

/// One simulated source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedSourceConfig {
    pub key: String,

    /// How long a load takes
    #[serde(default)]
    pub delay_ms: u64,

    /// Loads in the background without blocking pack readiness
    #[serde(default)]
    pub background: bool,

    /// Error message every load of this source ends with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

impl SimulatedSourceConfig {
    pub fn forced(key: &str) -> Self {
        Self {
            key: key.to_string(),
            delay_ms: FORCED_SOURCE_DELAY_MS,
            background: false,
            fail: None,
        }
    }
}

impl CliConfig {
    /// Example document written by `sourcepack init`.
    pub fn sample() -> Self {
        Self {
            pack: PackConfig::default(),
            sources: vec![
                SimulatedSourceConfig {
                    key: "feed".to_string(),
                    delay_ms: 300,
                    background: false,
                    fail: None,
                },
                SimulatedSourceConfig {
                    key: "mirrors".to_string(),
                    delay_ms: 800,
                    background: false,
                    fail: None,
                },
                SimulatedSourceConfig {
                    key: "archive".to_string(),
                    delay_ms: 2_000,
                    background: true,
                    fail: None,
                },
            ],
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let config: CliConfig = load_config(path).await?;
        config.validate().map_err(|cause| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "sources".to_string(),
            expected: "unique, non-blank source keys and valid [pack] settings".to_string(),
            cause,
        })?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        save_config(self, path).await
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.pack.validate()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.key.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sources.key".to_string(),
                    reason: "source keys must not be blank".to_string(),
                });
            }
            if !seen.insert(source.key.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "sources.key".to_string(),
                    reason: format!("duplicate source key {:?}", source.key),
                });
            }
        }
        Ok(())
    }

    /// Forced keys with no `[[sources]]` entry of their own.
    pub fn unlisted_forced_keys(&self) -> Vec<&str> {
        self.pack
            .forced_keys
            .iter()
            .filter(|key| !self.sources.iter().any(|s| &s.key == *key))
            .map(String::as_str)
            .collect()
    }
}

/// `$XDG_CONFIG_HOME/sourcepack/sourcepack.toml`, or `./sourcepack.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("sourcepack"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sourcepack.toml")
}
