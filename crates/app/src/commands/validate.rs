//! `validate`: check configuration and definitions without collecting

use std::io::Write;

use anyhow::{Context, Result};
use dora_infra::Engine;
use tracing::{info, warn};

use super::{load_config, write_line, Status};
use crate::cli::CommonArgs;

pub async fn execute(args: &CommonArgs, out: &mut dyn Write) -> Result<Status> {
    let mut config = load_config(args)?;
    config.exposition.enabled = false;
    if config.controller.definitions_dir.is_none() {
        warn!("no definitions directory given; only the configuration is checked");
    }

    let engine = Engine::builder(config).build().await.context("failed to build engine")?;
    let checks = engine.check_definitions().await.context("failed to read definitions")?;

    let mut invalid = 0usize;
    for check in &checks {
        match &check.error {
            None => write_line(out, &format!("ok       {}", check.subject))?,
            Some(error) => {
                invalid += 1;
                write_line(out, &format!("invalid  {}: {error}", check.subject))?;
            }
        }
    }

    info!(definitions = checks.len(), invalid, "validation finished");
    Ok(if invalid == 0 { Status::Success } else { Status::Failed })
}
