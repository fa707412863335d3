//! Command implementations

pub mod collect;
pub mod run;
pub mod validate;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use dora_domain::EngineConfig;
use dora_infra::config;

use crate::cli::{Command, CommonArgs};

/// How a command finished when it did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Completed, but found problems (for example invalid definitions)
    Failed,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => ExitCode::SUCCESS,
            Status::Failed => ExitCode::FAILURE,
        }
    }
}

/// Run a parsed command, writing user-facing output to stdout
pub async fn dispatch(command: Command) -> Result<Status> {
    let mut out = std::io::stdout();
    match command {
        Command::Run(args) => run::execute(&args).await,
        Command::Validate(args) => validate::execute(&args, &mut out).await,
        Command::Collect { common, export } => collect::execute(&common, export, &mut out).await,
    }
}

/// Load configuration for `args`, applying the `--definitions` override
pub fn load_config(args: &CommonArgs) -> Result<EngineConfig> {
    let mut config = config::load(args.config.clone()).context("failed to load configuration")?;
    if let Some(dir) = &args.definitions {
        config.controller.definitions_dir = Some(dir.clone());
    }
    Ok(config)
}

pub(crate) fn write_line(out: &mut dyn Write, line: &str) -> Result<()> {
    writeln!(out, "{line}").context("failed to write output")
}
