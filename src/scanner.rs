//! Directory walking for candidate files

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A regular file observed during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path under the scan root
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub modified_ns: i64,
}

/// Walks a target directory
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    follow_symlinks: bool,
}

impl Scanner {
    /// Validate `root` and prepare a scanner for it.
    ///
    /// The root is canonicalized so every yielded path is absolute and stable
    /// across runs. A missing or unreadable root is a configuration error.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|e| {
            Error::config(format!("Directory {} does not exist: {}", root.display(), e))
        })?;

        if !canonical.is_dir() {
            return Err(Error::config(format!(
                "{} is not a directory",
                canonical.display()
            )));
        }

        fs::read_dir(&canonical).map_err(|e| {
            Error::config(format!(
                "Directory {} is not readable: {}",
                canonical.display(),
                e
            ))
        })?;

        Ok(Self {
            root: canonical,
            follow_symlinks: false,
        })
    }

    /// Follow symbolic links while walking
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Canonical scan root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start walking. The returned iterator is lazy and single-use.
    pub fn scan(&self) -> Scan {
        debug!("Scanning {}", self.root.display());
        Scan {
            walker: WalkDir::new(&self.root)
                .follow_links(self.follow_symlinks)
                .into_iter(),
            skipped: 0,
        }
    }
}

/// Lazy sequence of files under a scan root
pub struct Scan {
    walker: walkdir::IntoIter,
    skipped: usize,
}

impl Scan {
    /// Number of entries that could not be read or stat'ed so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Scan {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping entry due to error: {}", e);
                    self.skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    self.skipped += 1;
                    continue;
                }
            };

            let modified_ns = match metadata.modified() {
                Ok(modified) => system_time_to_nanos(modified),
                Err(e) => {
                    warn!("Skipping {}: no modification time ({})", entry.path().display(), e);
                    self.skipped += 1;
                    continue;
                }
            };

            return Some(FileEntry {
                path: entry.into_path(),
                size: metadata.len(),
                modified_ns,
            });
        }
    }
}

/// Convert a filesystem timestamp to nanoseconds since the epoch.
///
/// Saturates outside the range representable as `i64` nanoseconds.
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    let datetime: DateTime<Utc> = time.into();
    datetime.timestamp_nanos_opt().unwrap_or(if datetime.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Current wall-clock time in nanoseconds since the epoch
pub fn now_nanos() -> i64 {
    system_time_to_nanos(SystemTime::now())
}
