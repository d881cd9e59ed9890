//! Error types for archive-verifier

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for archive-verifier operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Verification engine not found at {path}")]
    EngineUnavailable { path: PathBuf },

    #[error("Failed to persist state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether this error aborts a run before any state was touched
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. } | Error::EngineUnavailable { .. } | Error::TomlParse(_)
        )
    }
}

/// Result type alias for archive-verifier operations
pub type Result<T> = std::result::Result<T, Error>;
