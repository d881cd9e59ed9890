//! Verify command implementation.

use crate::cancel::CancellationToken;
use crate::config::VerifyConfig;
use crate::engine::SevenZipEngine;
use crate::messages::{Console, Lang, Messages};
use crate::orchestrator::{Orchestrator, RunReport, RunStatus, VerifyOptions};
use crate::Error;
use anyhow::{bail, Context, Result};
use clap::Args;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments for the verify command
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Directory to verify
    pub directory: PathBuf,

    /// Path to the 7-Zip executable
    #[arg(short, long)]
    pub seven_zip: Option<PathBuf>,

    /// Also verify .exe files as self-extracting archives
    #[arg(short, long)]
    pub exe: bool,

    /// Directory for the state file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of archives verified in parallel
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Message language (detected from the locale by default)
    #[arg(short, long, value_enum)]
    pub lang: Option<Lang>,
}

impl VerifyArgs {
    /// Config file values, overridden by whatever was given on the command line
    pub fn resolve_config(&self) -> Result<VerifyConfig> {
        let mut config = match &self.config {
            Some(path) => VerifyConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => VerifyConfig::default(),
        };

        if let Some(seven_zip) = &self.seven_zip {
            config.seven_zip = seven_zip.clone();
        }
        if self.exe {
            config.include_exe = true;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(threads) = self.threads {
            config.workers = threads;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Run the verify command
pub async fn run(args: VerifyArgs) -> Result<RunStatus> {
    let config = args.resolve_config()?;
    let messages = Messages::new(args.lang.unwrap_or_else(Lang::detect));

    if !args.directory.is_dir() {
        eprintln!("{}", messages.dir_not_exist(&args.directory));
        bail!("{} is not a directory", args.directory.display());
    }

    let engine = SevenZipEngine::new(&config.seven_zip)
        .with_probe_password(config.probe_password.clone())
        .with_poll_interval(config.poll_interval());
    let orchestrator = Orchestrator::new(Arc::new(engine), VerifyOptions::from(&config))
        .with_console(Console::new(messages));

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(watch_interrupt(
        tokio::signal::ctrl_c,
        cancel.clone(),
        messages,
    ));

    let target = args.directory.clone();
    let outcome = tokio::task::spawn_blocking(move || orchestrator.run(&target, &cancel))
        .await
        .context("Verification task failed")?;
    interrupt.abort();

    let report = match outcome {
        Ok(report) => report,
        Err(Error::EngineUnavailable { path }) => {
            eprintln!("{}", messages.engine_not_found(&path));
            return Err(Error::EngineUnavailable { path }.into());
        }
        Err(e) => return Err(e).context("Verification failed"),
    };

    print_summary(&report);
    Ok(report.status)
}

/// Raise `cancel` on the first interrupt.
///
/// Later interrupts only repeat the notice; the run kills its engine
/// processes, saves and returns by itself.
async fn watch_interrupt<F, Fut>(
    mut next_interrupt: F,
    cancel: CancellationToken,
    messages: Messages,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(e) = next_interrupt().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    eprintln!("{}", messages.terminating());
    info!("Cancellation requested");
    cancel.cancel();

    while next_interrupt().await.is_ok() {
        eprintln!("{}", messages.terminating());
    }
}

fn print_summary(report: &RunReport) {
    println!();
    match report.status {
        RunStatus::Completed => println!("Verification completed"),
        RunStatus::CompletedWithFailures => println!("Verification completed with failures"),
        RunStatus::Interrupted => println!("Verification interrupted"),
    }
    println!("  Archives:     {}", report.units);
    println!("  Verified:     {}", report.verified);
    println!("  Unchanged:    {}", report.skipped);
    println!("  Passed:       {}", report.succeeded);
    println!("  Corrupted:    {}", report.failed);
    println!("  Encrypted:    {}", report.encrypted);
    println!("  Errors:       {}", report.errors);
    println!("  New:          {}", report.new);
    println!("  Deleted:      {}", report.deleted);
    if report.scan_skipped > 0 {
        println!("  Unreadable:   {}", report.scan_skipped);
    }
    println!("  State file:   {}", report.state_path.display());
}
