//! # archive-verifier
//!
//! Incremental archive integrity verification backed by 7-Zip.
//!
//! A run scans a directory tree for archives, groups multi-volume RAR sets
//! into a single unit, and only hands an archive to the engine when it has
//! no settled result or has been modified since. Results live in a JSON
//! state file next to the caller, so interrupted or repeated runs pick up
//! where the last one stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use archive_verifier::{CancellationToken, Orchestrator, SevenZipEngine, VerifyOptions};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> archive_verifier::Result<()> {
//! let engine = Arc::new(SevenZipEngine::new("7z"));
//! let orchestrator = Orchestrator::new(engine, VerifyOptions::default());
//!
//! let report = orchestrator.run(Path::new("./downloads"), &CancellationToken::new())?;
//! println!("{} verified, {} unchanged", report.verified, report.skipped);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messages;
pub mod orchestrator;
pub mod recorder;
pub mod scanner;
pub mod state;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use classify::{ArchiveFormat, ArchiveUnit};
pub use config::VerifyConfig;
pub use engine::{EngineOutcome, SevenZipEngine, VerificationEngine};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunReport, RunStatus, VerifyOptions};
pub use state::{StateStore, VerificationRecord, VerificationState, VerifyResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
