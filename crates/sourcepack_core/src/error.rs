use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Structured failure attached to a source whose status is `Error`.
///
/// Sources record this instead of failing their load futures, so observers
/// find out about failures through state rather than through a returned error.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct LoadError {
    /// Short, user-facing description
    pub message: String,
    /// Optional longer explanation or hint
    #[help]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commentary: Option<String>,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            commentary: None,
        }
    }

    pub fn with_commentary(mut self, commentary: impl Into<String>) -> Self {
        self.commentary = Some(commentary.into());
        self
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("{operation} was cancelled")]
    #[diagnostic(
        code(sourcepack_core::cancelled),
        help("The caller's cancellation token fired before every operation settled")
    )]
    Cancelled { operation: String },

    #[error("Source {source_key}: {operation} failed - {cause}")]
    #[diagnostic(
        code(sourcepack_core::source_failed),
        help("Inspect the source's status and error for details")
    )]
    SourceFailed {
        source_key: String,
        operation: String,
        cause: String,
    },

    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(sourcepack_core::configuration_error),
        help("Check configuration file at {config_path}\nExpected: {expected}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn source_failed(
        source_key: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::SourceFailed {
            source_key: source_key.into(),
            operation: operation.into(),
            cause: cause.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
