//! Tracing subscriber setup
//!
//! Logs go to stderr so that `collect` can print JSON on stdout.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Filter from an explicit directive, else `RUST_LOG`, else `info`
pub fn filter(directive: Option<&str>) -> Result<EnvFilter> {
    match directive {
        Some(directive) => {
            EnvFilter::try_new(directive).with_context(|| format!("invalid log filter '{directive}'"))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber
///
/// # Errors
/// The directive does not parse or a subscriber is already installed.
pub fn init(directive: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = filter(directive)?;

    let layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .context("failed to install tracing subscriber")
}
