//! `run`: long-running engine until Ctrl-C or SIGTERM

use anyhow::{Context, Result};
use dora_infra::Engine;
use tracing::{error, info};

use super::{load_config, Status};
use crate::cli::CommonArgs;

pub async fn execute(args: &CommonArgs) -> Result<Status> {
    let config = load_config(args)?;
    let mut engine = Engine::builder(config).build().await.context("failed to build engine")?;
    engine.start().await.context("failed to start engine")?;

    if let Some(addr) = engine.exposition_addr() {
        info!(%addr, "serving /metrics, /healthz and /status");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");

    engine.shutdown().await.context("engine did not shut down cleanly")?;
    info!("Graceful shutdown complete");
    Ok(Status::Success)
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
