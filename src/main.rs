use std::process::ExitCode;

use cardledger::cli::{self, Cli};
use cardledger::telemetry;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.log_json, if cli.verbose { "info" } else { "warn" });

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("Error: {}", cli::error_message(&err));
            ExitCode::from(cli::exit_code(&err))
        }
    }
}
