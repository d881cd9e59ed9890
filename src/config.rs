//! Run configuration

use crate::engine::{DEFAULT_PROBE_PASSWORD, DEFAULT_SEVEN_ZIP};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Settings for a verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Path or name of the 7-Zip binary
    pub seven_zip: PathBuf,
    /// Treat `.exe` files as self-extracting archives
    pub include_exe: bool,
    /// Directory that holds the state files
    pub output_dir: PathBuf,
    /// Number of archives tested at once
    pub workers: usize,
    /// Follow symbolic links while scanning
    pub follow_symlinks: bool,
    /// Dummy password handed to the engine so it never prompts
    pub probe_password: String,
    /// How often a running engine checks for cancellation
    pub poll_interval_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            seven_zip: PathBuf::from(DEFAULT_SEVEN_ZIP),
            include_exe: false,
            output_dir: PathBuf::from("."),
            workers: 1,
            follow_symlinks: false,
            probe_password: DEFAULT_PROBE_PASSWORD.to_string(),
            poll_interval_ms: 50,
        }
    }
}

impl VerifyConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate config settings
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be greater than 0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be greater than 0"));
        }

        if self.seven_zip.as_os_str().is_empty() {
            return Err(Error::config("seven_zip must not be empty"));
        }

        if self.workers > 64 {
            warn!("High worker count configured: {}", self.workers);
        }

        Ok(())
    }
}
