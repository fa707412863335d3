//! `dora-engine` - DORA metrics collection and aggregation engine

use std::process::ExitCode;

use clap::Parser;
use dora_app::{commands, logging, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level.as_deref(), cli.log_format) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::from(2);
    }

    // Load environment variables from .env file
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "could not load .env file"),
    }

    match commands::dispatch(cli.command).await {
        Ok(status) => status.into(),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "dora-engine failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
