//! archive-verifier
//!
//! Main binary entry point for the command-line interface.

use archive_verifier::cli::{Cli, Commands};
use archive_verifier::logging::init_logging;
use clap::Parser;

/// Exit code for configuration and persistence failures
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{}", e);
    }

    let code = match cli.command {
        Commands::Verify(args) => match archive_verifier::cli::verify::run(args).await {
            Ok(status) => status.exit_code(),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                EXIT_FATAL
            }
        },
        Commands::Status(args) => match archive_verifier::cli::status::run(args).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                EXIT_FATAL
            }
        },
    };

    std::process::exit(code);
}
