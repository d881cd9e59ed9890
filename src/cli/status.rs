//! Status command implementation.

use crate::state::StateStore;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Directory whose recorded results to show
    pub directory: PathBuf,

    /// Directory holding the state file
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Print the raw state as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the status command
pub async fn run(args: StatusArgs) -> Result<()> {
    let target = args
        .directory
        .canonicalize()
        .with_context(|| format!("Directory {} does not exist", args.directory.display()))?;

    let store = StateStore::new(&args.output, &target);
    if !store.path().exists() {
        println!("No results recorded for {}", target.display());
        return Ok(());
    }

    let state = store.load();
    if args.json {
        println!("{}", state.to_json()?);
        return Ok(());
    }

    println!("Results for {}", target.display());
    println!("State file: {}", store.path().display());
    println!();
    for (result, count) in state.tally() {
        println!("  {:<10} {}", result, count);
    }

    if !state.is_empty() {
        println!();
        for (path, record) in &state.files {
            println!("  [{:<9}] {}", record.result.as_str(), path);
        }
    }

    Ok(())
}
