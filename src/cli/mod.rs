//! Command-line interface for archive-verifier.
//!
//! `verify` runs an incremental integrity pass over a directory; `status`
//! shows what the last passes recorded.

use clap::{Parser, Subcommand};

pub mod status;
pub mod verify;

/// archive-verifier - incremental archive integrity checks backed by 7-Zip
#[derive(Parser)]
#[command(name = "archive-verifier")]
#[command(about = "Incrementally verify archive integrity with 7-Zip")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Verify archives under a directory
    Verify(verify::VerifyArgs),
    /// Show recorded results for a directory
    Status(status::StatusArgs),
}
