//! Persisted verification state, one JSON file per target directory

use crate::{Error, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Outcome stored for a canonical path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyResult {
    Success,
    Failure,
    Encrypted,
    Deleted,
    Error,
    /// Written by earlier releases for entries still waiting on a pass.
    /// Never produced by this crate; treated as owing verification.
    Unchecked,
}

impl VerifyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyResult::Success => "success",
            VerifyResult::Failure => "failure",
            VerifyResult::Encrypted => "encrypted",
            VerifyResult::Deleted => "deleted",
            VerifyResult::Error => "error",
            VerifyResult::Unchecked => "unchecked",
        }
    }

    /// Results that stay put until the archive is modified
    pub fn is_settled(&self) -> bool {
        matches!(self, VerifyResult::Success | VerifyResult::Encrypted)
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known outcome for one archive unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub result: VerifyResult,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl VerificationRecord {
    pub fn new(result: VerifyResult, timestamp: i64) -> Self {
        Self { result, timestamp }
    }
}

/// All records for one target directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationState {
    pub target_directory: PathBuf,
    #[serde(default)]
    pub files: BTreeMap<String, VerificationRecord>,
}

impl VerificationState {
    /// Create an empty state for `target_directory`
    pub fn new<P: Into<PathBuf>>(target_directory: P) -> Self {
        Self {
            target_directory: target_directory.into(),
            files: BTreeMap::new(),
        }
    }

    /// Look up the record for a canonical path
    pub fn get(&self, path: &str) -> Option<&VerificationRecord> {
        self.files.get(path)
    }

    /// Insert or overwrite the record for a canonical path
    pub fn set(&mut self, path: impl Into<String>, record: VerificationRecord) {
        self.files.insert(path.into(), record);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of records per result
    pub fn tally(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in self.files.values() {
            *counts.entry(record.result.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Loads and saves the state file of one target directory
#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
    target_directory: PathBuf,
}

impl StateStore {
    /// Resolve the state file for `target_directory` inside `output_dir`.
    ///
    /// `target_directory` should already be canonical; the file name is
    /// `result_<first 8 hex of md5(path)>.json`.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(output_dir: P, target_directory: Q) -> Self {
        let target_directory = target_directory.as_ref().to_path_buf();
        let state_path = output_dir
            .as_ref()
            .join(format!("result_{}.json", dir_hash(&target_directory)));
        Self {
            state_path,
            target_directory,
        }
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Load the prior state.
    ///
    /// Missing, unreadable or malformed files yield an empty state; losing
    /// stale history only costs extra verification passes.
    pub fn load(&self) -> VerificationState {
        if !self.state_path.exists() {
            debug!("No state file at {}", self.state_path.display());
            return VerificationState::new(&self.target_directory);
        }

        match self.read() {
            Ok(state) if state.target_directory == self.target_directory => {
                info!(
                    "Loaded {} records from {}",
                    state.len(),
                    self.state_path.display()
                );
                state
            }
            Ok(state) => {
                warn!(
                    "State file {} belongs to {}, starting fresh",
                    self.state_path.display(),
                    state.target_directory.display()
                );
                VerificationState::new(&self.target_directory)
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable state file {}: {}",
                    self.state_path.display(),
                    e
                );
                VerificationState::new(&self.target_directory)
            }
        }
    }

    fn read(&self) -> Result<VerificationState> {
        let file = File::open(&self.state_path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Durably write `state`.
    ///
    /// The JSON goes to a temporary file in the same directory which is
    /// synced and then renamed over the destination, so readers see either
    /// the old file or the new one.
    pub fn save(&self, state: &VerificationState) -> Result<()> {
        let dir = self
            .state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        fs::create_dir_all(dir).map_err(|e| self.persist_error(e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.persist_error(e))?;
        self.write_json(BufWriter::new(tmp.as_file_mut()), state)?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.persist_error(e))?;
        tmp.persist(&self.state_path)
            .map_err(|e| self.persist_error(e.error))?;

        debug!(
            "Saved {} records to {}",
            state.len(),
            self.state_path.display()
        );
        Ok(())
    }

    fn write_json<W: Write>(&self, mut writer: W, state: &VerificationState) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
            if e.is_io() {
                self.persist_error(e.into())
            } else {
                Error::Serialization(e)
            }
        })?;
        writer
            .write_all(b"\n")
            .and_then(|()| writer.flush())
            .map_err(|e| self.persist_error(e))
    }

    fn persist_error(&self, source: std::io::Error) -> Error {
        Error::Persist {
            path: self.state_path.clone(),
            source,
        }
    }
}

/// Short, stable identifier of a directory path
pub fn dir_hash(path: &Path) -> String {
    let digest = Md5::digest(path.to_string_lossy().as_bytes());
    hex::encode(digest)[..8].to_string()
}
