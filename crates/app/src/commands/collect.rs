//! `collect`: run every enabled indicator once and print the results

use std::io::Write;

use anyhow::{Context, Result};
use dora_infra::Engine;
use tracing::{info, warn};

use super::{load_config, write_line, Status};
use crate::cli::CommonArgs;

/// Failed indicators are part of the output and do not fail the command
pub async fn execute(args: &CommonArgs, export: bool, out: &mut dyn Write) -> Result<Status> {
    let mut config = load_config(args)?;
    config.exposition.enabled = false;

    let mut engine = Engine::builder(config).build().await.context("failed to build engine")?;
    let (report, results) = engine.collect_once(export).await.context("collection failed")?;
    if report.invalid > 0 {
        warn!(invalid = report.invalid, "invalid definitions were skipped");
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    let json = serde_json::to_string_pretty(&results).context("failed to encode results")?;
    write_line(out, &json)?;

    engine.shutdown().await.context("failed to shut down cleanly")?;
    info!(results = results.len(), failed, export, "collection finished");
    Ok(Status::Success)
}
