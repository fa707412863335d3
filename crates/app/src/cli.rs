//! Command-line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// DORA metrics collection and aggregation engine
#[derive(Parser, Debug)]
#[command(name = "dora-engine", author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter directive (overrides RUST_LOG), e.g. `debug` or `dora_infra=trace`
    #[arg(long, global = true, env = "DORA_LOG")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "DORA_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the controller, scheduler and exposition endpoint until Ctrl-C
    Run(CommonArgs),

    /// Check configuration and every definition, then exit
    Validate(CommonArgs),

    /// Run every enabled indicator once and print the results as JSON
    Collect {
        #[command(flatten)]
        common: CommonArgs,

        /// Deliver results to the definitions' sinks as well
        #[arg(long)]
        export: bool,
    },
}

/// Arguments shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Configuration file (TOML or JSON); standard locations are probed when omitted
    #[arg(short, long, env = "DORA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of metric definition files (overrides the configuration)
    #[arg(short, long)]
    pub definitions: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
