//! Incremental verification run
//!
//! One run scans the target directory, groups archives into units, decides
//! which units need the engine, records the outcomes, marks vanished records
//! deleted and persists the state once at the end.

use crate::cancel::CancellationToken;
use crate::classify::{group, ArchiveUnit};
use crate::config::VerifyConfig;
use crate::engine::{EngineOutcome, VerificationEngine};
use crate::messages::Console;
use crate::recorder::mark_deleted;
use crate::scanner::{now_nanos, Scanner};
use crate::state::{StateStore, VerificationRecord, VerificationState, VerifyResult};
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Finished, but at least one unit failed or could not be tested
    CompletedWithFailures,
    Interrupted,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::CompletedWithFailures => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub units: usize,
    pub verified: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub encrypted: usize,
    pub errors: usize,
    pub deleted: usize,
    pub new: usize,
    /// Directory entries the scanner could not read
    pub scan_skipped: usize,
    pub state_path: PathBuf,
}

/// Run settings that do not concern the engine itself
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub include_exe: bool,
    pub workers: usize,
    pub follow_symlinks: bool,
    pub output_dir: PathBuf,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

impl From<&VerifyConfig> for VerifyOptions {
    fn from(config: &VerifyConfig) -> Self {
        Self {
            include_exe: config.include_exe,
            workers: config.workers,
            follow_symlinks: config.follow_symlinks,
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Whether `unit` has to go through the engine given its prior record
pub fn needs_verification(prior: Option<&VerificationRecord>, unit: &ArchiveUnit) -> bool {
    match prior {
        None => true,
        Some(record) => match record.result {
            VerifyResult::Success | VerifyResult::Encrypted => {
                unit.modified_ns > record.timestamp
            }
            VerifyResult::Failure
            | VerifyResult::Error
            | VerifyResult::Deleted
            | VerifyResult::Unchecked => true,
        },
    }
}

#[derive(Debug, Default)]
struct Tally {
    verified: usize,
    succeeded: usize,
    failed: usize,
    encrypted: usize,
    errors: usize,
    touched: HashSet<String>,
}

/// State being mutated by verification, guarded as one value
struct Progress {
    state: VerificationState,
    tally: Tally,
}

impl Progress {
    fn record(&mut self, unit: &ArchiveUnit, outcome: &EngineOutcome, console: &Console) {
        let key = unit.key();

        let Some(result) = outcome.to_result() else {
            info!("Discarded interrupted verification of {}", key);
            console.say(|m| m.interrupted(&key));
            return;
        };

        let prior = self.state.get(&key).map(|r| r.timestamp).unwrap_or(i64::MIN);
        self.state
            .set(key.clone(), VerificationRecord::new(result, now_nanos().max(prior)));

        self.tally.verified += 1;
        match outcome {
            EngineOutcome::IntegrityConfirmed => {
                self.tally.succeeded += 1;
                info!("{} verified", key);
                console.say(|m| m.verify_success(&key));
            }
            EngineOutcome::IntegrityFailed => {
                self.tally.failed += 1;
                warn!("{} is corrupted", key);
                console.say(|m| m.verify_fail(&key));
            }
            EngineOutcome::PasswordRequired => {
                self.tally.encrypted += 1;
                info!("{} is encrypted", key);
                console.say(|m| m.encrypted_file(&key));
            }
            EngineOutcome::InvocationError(reason) => {
                self.tally.errors += 1;
                warn!("Could not verify {}: {}", key, reason);
                console.say(|m| m.process_error(&key, reason));
            }
            EngineOutcome::Interrupted => {}
        }
        self.tally.touched.insert(key);
    }
}

/// Drives a verification run over one target directory
pub struct Orchestrator {
    engine: Arc<dyn VerificationEngine>,
    options: VerifyOptions,
    console: Console,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn VerificationEngine>, options: VerifyOptions) -> Self {
        Self {
            engine,
            options,
            console: Console::silent(),
        }
    }

    /// Print per-unit progress lines through `console`
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Verify everything under `target` that needs it.
    ///
    /// Configuration problems surface before the state is touched. Once
    /// cancellation is raised no further unit starts; whatever finished is
    /// still saved.
    pub fn run(&self, target: &Path, cancel: &CancellationToken) -> Result<RunReport> {
        if self.options.workers == 0 {
            return Err(Error::config("workers must be greater than 0"));
        }

        let scanner = Scanner::new(target)?.with_follow_symlinks(self.options.follow_symlinks);
        self.engine.check_available()?;

        let store = StateStore::new(&self.options.output_dir, scanner.root());
        let state = store.load();

        info!("Scanning {}", scanner.root().display());
        let mut scan = scanner.scan();
        let entries: Vec<_> = scan.by_ref().collect();
        let scan_skipped = scan.skipped();

        let units = group(entries, self.options.include_exe);
        let present: HashSet<String> = units.iter().map(ArchiveUnit::key).collect();
        debug!("Found {} archive units", units.len());

        let mut new = 0;
        for unit in &units {
            if state.get(&unit.key()).is_none() {
                new += 1;
                self.console.say(|m| m.new_file(&unit.key()));
            }
        }

        let pending: Vec<&ArchiveUnit> = units
            .iter()
            .filter(|unit| needs_verification(state.get(&unit.key()), unit))
            .collect();
        let skipped = units.len() - pending.len();
        info!(
            "{} units to verify, {} unchanged",
            pending.len(),
            skipped
        );
        self.console.say(|m| m.files_to_verify(pending.len()));

        let mut progress = Progress {
            state,
            tally: Tally::default(),
        };

        if self.options.workers == 1 {
            self.verify_sequential(&pending, &mut progress, cancel);
        } else {
            progress = self.verify_parallel(&pending, progress, cancel)?;
        }

        let interrupted = cancel.is_cancelled();
        if interrupted {
            warn!("Run interrupted, saving partial results");
        }

        let Progress { mut state, tally } = progress;
        let deleted = mark_deleted(&mut state, &present, &tally.touched, now_nanos());
        for key in &deleted {
            info!("{} no longer exists", key);
            self.console.say(|m| m.file_deleted(key));
        }

        store.save(&state)?;
        info!("State saved to {}", store.path().display());

        let status = if interrupted {
            RunStatus::Interrupted
        } else if tally.failed + tally.errors > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };

        Ok(RunReport {
            status,
            units: units.len(),
            verified: tally.verified,
            skipped,
            succeeded: tally.succeeded,
            failed: tally.failed,
            encrypted: tally.encrypted,
            errors: tally.errors,
            deleted: deleted.len(),
            new,
            scan_skipped,
            state_path: store.path().to_path_buf(),
        })
    }

    fn verify_sequential(
        &self,
        pending: &[&ArchiveUnit],
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) {
        for unit in pending {
            if cancel.is_cancelled() {
                break;
            }
            self.console.say(|m| m.verifying(&unit.key()));
            let outcome = self.engine.verify(&unit.canonical_path, cancel);
            progress.record(unit, &outcome, &self.console);
        }
    }

    fn verify_parallel(
        &self,
        pending: &[&ArchiveUnit],
        progress: Progress,
        cancel: &CancellationToken,
    ) -> Result<Progress> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
            .map_err(|e| Error::config(format!("Failed to build worker pool: {}", e)))?;

        let shared = Mutex::new(progress);
        pool.install(|| {
            pending.par_iter().for_each(|unit| {
                if cancel.is_cancelled() {
                    return;
                }
                self.console.say(|m| m.verifying(&unit.key()));
                let outcome = self.engine.verify(&unit.canonical_path, cancel);
                let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
                guard.record(unit, &outcome, &self.console);
            });
        });

        Ok(shared.into_inner().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Engine double keyed by file name, recording every call
    #[derive(Default)]
    struct FakeEngine {
        outcomes: HashMap<String, EngineOutcome>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Option<usize>,
        unavailable: bool,
    }

    impl FakeEngine {
        fn with(mut self, name: &str, outcome: EngineOutcome) -> Self {
            self.outcomes.insert(name.to_string(), outcome);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl VerificationEngine for FakeEngine {
        fn check_available(&self) -> Result<()> {
            if self.unavailable {
                return Err(Error::EngineUnavailable {
                    path: PathBuf::from("fake-7z"),
                });
            }
            Ok(())
        }

        fn verify(&self, archive: &Path, cancel: &CancellationToken) -> EngineOutcome {
            let name = archive.file_name().unwrap().to_string_lossy().into_owned();
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(name.clone());
                calls.len()
            };
            if self.cancel_on_call == Some(count) {
                cancel.cancel();
            }
            self.outcomes
                .get(&name)
                .cloned()
                .unwrap_or(EngineOutcome::IntegrityConfirmed)
        }
    }

    struct Fixture {
        target: TempDir,
        output: TempDir,
    }

    impl Fixture {
        fn new(files: &[&str]) -> Self {
            let target = TempDir::new().unwrap();
            for name in files {
                fs::write(target.path().join(name), b"archive bytes").unwrap();
            }
            Self {
                target,
                output: TempDir::new().unwrap(),
            }
        }

        fn root(&self) -> PathBuf {
            self.target.path().canonicalize().unwrap()
        }

        fn key(&self, name: &str) -> String {
            self.root().join(name).to_string_lossy().into_owned()
        }

        fn options(&self) -> VerifyOptions {
            VerifyOptions {
                output_dir: self.output.path().to_path_buf(),
                ..VerifyOptions::default()
            }
        }

        fn store(&self) -> StateStore {
            StateStore::new(self.output.path(), self.root())
        }

        fn run(&self, engine: Arc<FakeEngine>) -> Result<RunReport> {
            self.run_with(engine, self.options())
        }

        fn run_with(&self, engine: Arc<FakeEngine>, options: VerifyOptions) -> Result<RunReport> {
            Orchestrator::new(engine, options).run(self.target.path(), &CancellationToken::new())
        }
    }

    #[test]
    fn test_policy() {
        let unit = ArchiveUnit {
            canonical_path: PathBuf::from("/t/a.7z"),
            format: crate::classify::ArchiveFormat::Generic7z,
            parts: vec![PathBuf::from("/t/a.7z")],
            size: 1,
            modified_ns: 100,
        };
        let rec = |result| VerificationRecord::new(result, 200);

        assert!(needs_verification(None, &unit));
        assert!(!needs_verification(Some(&rec(VerifyResult::Success)), &unit));
        assert!(!needs_verification(Some(&rec(VerifyResult::Encrypted)), &unit));
        assert!(needs_verification(Some(&rec(VerifyResult::Failure)), &unit));
        assert!(needs_verification(Some(&rec(VerifyResult::Error)), &unit));
        assert!(needs_verification(Some(&rec(VerifyResult::Deleted)), &unit));
        assert!(needs_verification(Some(&rec(VerifyResult::Unchecked)), &unit));

        let stale = VerificationRecord::new(VerifyResult::Success, 50);
        assert!(needs_verification(Some(&stale), &unit));
    }

    #[test]
    fn test_settled_units_are_not_reverified() -> Result<()> {
        let fx = Fixture::new(&["a.7z", "b.zip"]);
        let engine = Arc::new(FakeEngine::default().with("b.zip", EngineOutcome::PasswordRequired));
        let first = fx.run(engine.clone())?;
        assert_eq!(first.verified, 2);
        assert_eq!(first.encrypted, 1);
        assert_eq!(first.new, 2);
        assert_eq!(first.status, RunStatus::Completed);

        let second = fx.run(engine.clone())?;
        assert_eq!(second.verified, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.new, 0);
        assert_eq!(engine.calls().len(), 2);
        Ok(())
    }

    #[test]
    fn test_failures_and_errors_are_retried() -> Result<()> {
        let fx = Fixture::new(&["bad.7z", "odd.zip"]);
        let engine = Arc::new(
            FakeEngine::default()
                .with("bad.7z", EngineOutcome::IntegrityFailed)
                .with("odd.zip", EngineOutcome::InvocationError("boom".into())),
        );

        for _ in 0..3 {
            let report = fx.run(engine.clone())?;
            assert_eq!(report.failed, 1);
            assert_eq!(report.errors, 1);
            assert_eq!(report.status, RunStatus::CompletedWithFailures);
            assert_eq!(report.status.exit_code(), 1);
        }
        assert_eq!(engine.calls().len(), 6);

        let state = fx.store().load();
        assert_eq!(state.get(&fx.key("bad.7z")).unwrap().result, VerifyResult::Failure);
        assert_eq!(state.get(&fx.key("odd.zip")).unwrap().result, VerifyResult::Error);
        Ok(())
    }

    #[test]
    fn test_double_run_is_idempotent() -> Result<()> {
        let fx = Fixture::new(&["a.7z", "b.zip", "c.rar"]);
        let engine = Arc::new(FakeEngine::default());
        fx.run(engine.clone())?;
        let first = fs::read_to_string(fx.store().path())?;

        fx.run(engine)?;
        let second = fs::read_to_string(fx.store().path())?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_vanished_archive_is_marked_deleted() -> Result<()> {
        let fx = Fixture::new(&["a.7z", "b.zip"]);
        let engine = Arc::new(FakeEngine::default());
        fx.run(engine.clone())?;
        let before = fx.store().load().get(&fx.key("b.zip")).copied().unwrap();

        fs::remove_file(fx.target.path().join("b.zip"))?;
        let report = fx.run(engine.clone())?;
        assert_eq!(report.deleted, 1);

        let state = fx.store().load();
        let after = state.get(&fx.key("b.zip")).copied().unwrap();
        assert_eq!(after.result, VerifyResult::Deleted);
        assert!(after.timestamp >= before.timestamp);
        assert_eq!(state.len(), 2);

        let again = fx.run(engine)?;
        assert_eq!(again.deleted, 0);
        assert_eq!(fx.store().load().get(&fx.key("b.zip")), Some(&after));
        Ok(())
    }

    #[test]
    fn test_multipart_rar_is_one_record() -> Result<()> {
        let fx = Fixture::new(&[
            "archive.part1.rar",
            "archive.part2.rar",
            "archive.part3.rar",
        ]);
        let engine = Arc::new(FakeEngine::default());
        let report = fx.run(engine.clone())?;

        assert_eq!(report.units, 1);
        assert_eq!(engine.calls(), vec!["archive.part1.rar".to_string()]);
        let state = fx.store().load();
        assert_eq!(state.len(), 1);
        assert!(state.get(&fx.key("archive.part1.rar")).is_some());
        Ok(())
    }

    #[test]
    fn test_interrupt_after_third_unit() -> Result<()> {
        let fx = Fixture::new(&["1.7z", "2.7z", "3.7z", "4.7z", "5.7z"]);
        let engine = Arc::new(FakeEngine {
            cancel_on_call: Some(3),
            ..FakeEngine::default()
        });
        let report = fx.run(engine.clone())?;

        assert_eq!(report.status, RunStatus::Interrupted);
        assert_eq!(report.status.exit_code(), 130);
        assert_eq!(engine.calls().len(), 3);

        let state = fx.store().load();
        let keys: Vec<&String> = state.files.keys().collect();
        assert_eq!(
            keys,
            vec![&fx.key("1.7z"), &fx.key("2.7z"), &fx.key("3.7z")]
        );
        Ok(())
    }

    #[test]
    fn test_in_flight_interrupted_unit_is_discarded() -> Result<()> {
        let fx = Fixture::new(&["1.7z", "2.7z"]);
        let engine = Arc::new(FakeEngine {
            cancel_on_call: Some(2),
            ..FakeEngine::default()
        }
        .with("2.7z", EngineOutcome::Interrupted));
        let report = fx.run(engine)?;

        assert_eq!(report.status, RunStatus::Interrupted);
        assert_eq!(report.verified, 1);
        let state = fx.store().load();
        assert_eq!(state.len(), 1);
        assert!(state.get(&fx.key("2.7z")).is_none());
        Ok(())
    }

    #[test]
    fn test_mixed_directory_scenario() -> Result<()> {
        let fx = Fixture::new(&["a.7z", "b.zip", "c.rar"]);
        let b_stamp = now_nanos();
        let mut prior = VerificationState::new(fx.root());
        prior.set(fx.key("b.zip"), VerificationRecord::new(VerifyResult::Success, b_stamp));
        prior.set(fx.key("c.rar"), VerificationRecord::new(VerifyResult::Failure, b_stamp));
        fx.store().save(&prior)?;

        let engine = Arc::new(FakeEngine::default());
        let report = fx.run(engine.clone())?;

        let mut calls = engine.calls();
        calls.sort();
        assert_eq!(calls, vec!["a.7z".to_string(), "c.rar".to_string()]);
        assert_eq!(report.new, 1);
        assert_eq!(report.skipped, 1);

        let state = fx.store().load();
        assert_eq!(state.len(), 3);
        assert_eq!(
            state.get(&fx.key("b.zip")),
            Some(&VerificationRecord::new(VerifyResult::Success, b_stamp))
        );
        assert_eq!(state.get(&fx.key("c.rar")).unwrap().result, VerifyResult::Success);
        Ok(())
    }

    #[test]
    fn test_modified_archive_is_reverified() -> Result<()> {
        let fx = Fixture::new(&["a.7z"]);
        let engine = Arc::new(FakeEngine::default());
        fx.run(engine.clone())?;

        let file = fs::File::options()
            .write(true)
            .open(fx.target.path().join("a.7z"))?;
        file.set_modified(SystemTime::now() + Duration::from_secs(60))?;

        let report = fx.run(engine.clone())?;
        assert_eq!(report.verified, 1);
        assert_eq!(engine.calls().len(), 2);
        Ok(())
    }

    #[test]
    fn test_parallel_workers_verify_everything() -> Result<()> {
        let fx = Fixture::new(&["1.7z", "2.zip", "3.rar", "4.7z"]);
        let engine = Arc::new(FakeEngine::default().with("3.rar", EngineOutcome::IntegrityFailed));
        let options = VerifyOptions {
            workers: 3,
            ..fx.options()
        };
        let report = fx.run_with(engine.clone(), options)?;

        assert_eq!(report.verified, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(engine.calls().len(), 4);
        assert_eq!(fx.store().load().len(), 4);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entries_are_reported_not_fatal() -> Result<()> {
        let fx = Fixture::new(&["a.7z"]);
        std::os::unix::fs::symlink(
            fx.target.path().join("missing.zip"),
            fx.target.path().join("dangling.zip"),
        )?;
        let options = VerifyOptions {
            follow_symlinks: true,
            ..fx.options()
        };
        let report = fx.run_with(Arc::new(FakeEngine::default()), options)?;

        assert_eq!(report.scan_skipped, 1);
        assert_eq!(report.units, 1);
        assert_eq!(report.status, RunStatus::Completed);
        Ok(())
    }

    #[test]
    fn test_unavailable_engine_leaves_state_untouched() {
        let fx = Fixture::new(&["a.7z"]);
        let engine = Arc::new(FakeEngine {
            unavailable: true,
            ..FakeEngine::default()
        });
        let err = fx.run(engine).unwrap_err();
        assert!(err.is_configuration());
        assert!(!fx.store().path().exists());
    }

    #[test]
    fn test_missing_target_is_configuration_error() {
        let output = TempDir::new().unwrap();
        let options = VerifyOptions {
            output_dir: output.path().to_path_buf(),
            ..VerifyOptions::default()
        };
        let err = Orchestrator::new(Arc::new(FakeEngine::default()), options)
            .run(&output.path().join("nope"), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
