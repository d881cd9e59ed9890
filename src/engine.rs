//! External archive verification engine
//!
//! The byte-level integrity test is delegated to 7-Zip (`7z t`). This module
//! owns the engine's invocation details and maps its exit status and output
//! onto [`EngineOutcome`].

use crate::cancel::CancellationToken;
use crate::state::VerifyResult;
use crate::{Error, Result};
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default location of the 7-Zip command-line binary
#[cfg(windows)]
pub const DEFAULT_SEVEN_ZIP: &str = r"C:\Program Files\7-Zip\7z.exe";

/// Default location of the 7-Zip command-line binary
#[cfg(not(windows))]
pub const DEFAULT_SEVEN_ZIP: &str = "7z";

/// Password passed on every test so 7-Zip never prompts; any real encrypted
/// archive rejects it and reports a password problem instead.
pub const DEFAULT_PROBE_PASSWORD: &str = "archive-verifier-probe";

/// Exit codes 7-Zip uses when it could not run the test at all
const SEVEN_ZIP_COMMAND_LINE_ERROR: i32 = 7;
const SEVEN_ZIP_OUT_OF_MEMORY: i32 = 8;

/// Lower-cased openings of the messages 7-Zip prints for a password problem
const PASSWORD_MESSAGES: &[&str] = &[
    "wrong password",
    "can not open encrypted archive",
    "data error in encrypted file",
    "crc failed in encrypted file",
    "headers error in encrypted archive",
];

/// What the engine concluded about one archive unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    IntegrityConfirmed,
    IntegrityFailed,
    PasswordRequired,
    /// The engine could not be run or gave up before testing
    InvocationError(String),
    /// The run was cancelled while the engine was working; no result
    Interrupted,
}

impl EngineOutcome {
    /// Result to record, or `None` when the outcome must be discarded
    pub fn to_result(&self) -> Option<VerifyResult> {
        match self {
            EngineOutcome::IntegrityConfirmed => Some(VerifyResult::Success),
            EngineOutcome::IntegrityFailed => Some(VerifyResult::Failure),
            EngineOutcome::PasswordRequired => Some(VerifyResult::Encrypted),
            EngineOutcome::InvocationError(_) => Some(VerifyResult::Error),
            EngineOutcome::Interrupted => None,
        }
    }
}

/// Tests archive integrity
pub trait VerificationEngine: Send + Sync {
    /// Fail fast when the engine cannot be used at all
    fn check_available(&self) -> Result<()>;

    /// Test the archive whose entry point is `archive`.
    ///
    /// Implementations block until the test is finished. When `cancel` is
    /// raised mid-test they stop the work and return
    /// [`EngineOutcome::Interrupted`].
    fn verify(&self, archive: &Path, cancel: &CancellationToken) -> EngineOutcome;
}

/// Runs `7z t` as a child process per archive
#[derive(Debug, Clone)]
pub struct SevenZipEngine {
    executable: PathBuf,
    probe_password: String,
    poll_interval: Duration,
}

impl SevenZipEngine {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self {
            executable: executable.into(),
            probe_password: DEFAULT_PROBE_PASSWORD.to_string(),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_probe_password(mut self, password: impl Into<String>) -> Self {
        self.probe_password = password.into();
        self
    }

    /// How often a running test checks for cancellation
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, archive: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("t")
            .arg("-y")
            .arg(format!("-p{}", self.probe_password))
            .arg(archive)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Keep terminal Ctrl-C away from the child; cancellation kills it explicitly
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd
    }
}

impl VerificationEngine for SevenZipEngine {
    fn check_available(&self) -> Result<()> {
        match resolve_executable(&self.executable) {
            Some(path) => {
                debug!("Using verification engine {}", path.display());
                Ok(())
            }
            None => Err(Error::EngineUnavailable {
                path: self.executable.clone(),
            }),
        }
    }

    fn verify(&self, archive: &Path, cancel: &CancellationToken) -> EngineOutcome {
        let mut child = match self.command(archive).spawn() {
            Ok(child) => child,
            Err(e) => {
                return EngineOutcome::InvocationError(format!(
                    "failed to start {}: {}",
                    self.executable.display(),
                    e
                ))
            }
        };

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return EngineOutcome::InvocationError(format!("failed to wait on engine: {}", e));
                }
            }

            if cancel.is_cancelled() {
                debug!("Terminating engine for {}", archive.display());
                if let Err(e) = child.kill() {
                    warn!("Failed to terminate engine: {}", e);
                }
                let _ = child.wait();
                return EngineOutcome::Interrupted;
            }

            thread::sleep(self.poll_interval);
        };

        let mut output = collect(stdout);
        output.push_str(&collect(stderr));

        // A test that ended badly after cancellation was most likely cut short
        if !status.success() && cancel.is_cancelled() {
            return EngineOutcome::Interrupted;
        }

        interpret(status.code(), &output)
    }
}

/// Map a finished 7-Zip test onto an outcome
pub fn interpret(exit_code: Option<i32>, output: &str) -> EngineOutcome {
    if exit_code == Some(0) {
        return EngineOutcome::IntegrityConfirmed;
    }

    if reports_password_problem(output) {
        return EngineOutcome::PasswordRequired;
    }

    match exit_code {
        None => EngineOutcome::InvocationError("engine terminated by signal".to_string()),
        Some(code @ (SEVEN_ZIP_COMMAND_LINE_ERROR | SEVEN_ZIP_OUT_OF_MEMORY)) => {
            EngineOutcome::InvocationError(format!("engine exited with code {}", code))
        }
        Some(_) => EngineOutcome::IntegrityFailed,
    }
}

/// Whether any line of the output is one of 7-Zip's own password messages.
///
/// Only the start of a line (after an optional `ERROR:`) is matched, so the
/// archive path and member names 7-Zip echoes never count.
fn reports_password_problem(output: &str) -> bool {
    output.lines().any(|line| {
        let lower = line.trim().to_lowercase();
        let message = lower
            .strip_prefix("error:")
            .map(str::trim_start)
            .unwrap_or(lower.as_str());
        PASSWORD_MESSAGES
            .iter()
            .any(|prefix| message.starts_with(prefix))
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Find an executable either at an explicit path or on `PATH`
pub fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        return executable.is_file().then(|| executable.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(executable);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let with_ext = candidate.with_extension("exe");
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
        None
    })
}
