//! Engine configuration structures
//!
//! All durations are human strings in configuration files (`"30s"`, `"15m"`).
//! Every section has defaults, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use dora_common::{duration_str, Jitter};
use serde::{Deserialize, Serialize};

use crate::errors::{DoraError, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub export: ExportConfig,
    pub exposition: ExpositionConfig,
    pub controller: ControllerConfig,
    pub status: StatusConfig,
    pub http: HttpConfig,
}

impl EngineConfig {
    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.worker_slots == 0 {
            return Err(DoraError::Config("scheduler.worker_slots must be at least 1".into()));
        }
        if s.run_timeout.is_zero() {
            return Err(DoraError::Config("scheduler.run_timeout must be positive".into()));
        }
        if s.tick_interval.is_zero() {
            return Err(DoraError::Config("scheduler.tick_interval must be positive".into()));
        }
        if s.backoff_base > s.backoff_max {
            return Err(DoraError::Config(
                "scheduler.backoff_base must not exceed scheduler.backoff_max".into(),
            ));
        }

        let e = &self.export;
        if e.push_attempts == 0 {
            return Err(DoraError::Config("export.push_attempts must be at least 1".into()));
        }
        if e.push_timeout.is_zero() {
            return Err(DoraError::Config("export.push_timeout must be positive".into()));
        }
        if e.push_base_delay > e.push_max_delay {
            return Err(DoraError::Config(
                "export.push_base_delay must not exceed export.push_max_delay".into(),
            ));
        }
        if e.dead_letter_capacity == 0 {
            return Err(DoraError::Config("export.dead_letter_capacity must be at least 1".into()));
        }

        if self.controller.resync_interval.is_zero() {
            return Err(DoraError::Config("controller.resync_interval must be positive".into()));
        }
        if self.controller.stale_factor == 0 {
            return Err(DoraError::Config("controller.stale_factor must be at least 1".into()));
        }

        if self.exposition.enabled && self.exposition.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(DoraError::Config(format!(
                "exposition.listen_addr '{}' is not a socket address",
                self.exposition.listen_addr
            )));
        }

        if self.http.timeout.is_zero() {
            return Err(DoraError::Config("http.timeout must be positive".into()));
        }

        Ok(())
    }
}

/// Collection scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Parallel execution slots
    pub worker_slots: usize,
    /// Upper bound between due-entry scans
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    /// Per-run deadline; expiry counts as a transient network error
    #[serde(with = "duration_str")]
    pub run_timeout: Duration,
    /// Retryable failures allowed before falling back to the regular schedule
    pub retry_ceiling: u32,
    #[serde(with = "duration_str")]
    pub backoff_base: Duration,
    #[serde(with = "duration_str")]
    pub backoff_max: Duration,
    pub jitter: Jitter,
    /// How long shutdown waits for in-flight runs and dispatches
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_slots: 4,
            tick_interval: Duration::from_secs(1),
            run_timeout: Duration::from_secs(120),
            retry_ceiling: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(15 * 60),
            jitter: Jitter::None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Export dispatcher settings for push sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub push_attempts: u32,
    #[serde(with = "duration_str")]
    pub push_base_delay: Duration,
    #[serde(with = "duration_str")]
    pub push_max_delay: Duration,
    #[serde(with = "duration_str")]
    pub push_timeout: Duration,
    pub dead_letter_capacity: usize,
    /// Optional JSON-lines file receiving dead letters
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            push_attempts: 3,
            push_base_delay: Duration::from_secs(1),
            push_max_delay: Duration::from_secs(30),
            push_timeout: Duration::from_secs(10),
            dead_letter_capacity: 1_000,
            dead_letter_path: None,
        }
    }
}

/// HTTP exposition endpoint (`/metrics`, `/healthz`, `/status`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self { enabled: true, listen_addr: "0.0.0.0:9464".to_string() }
    }
}

/// Reconciliation controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Directory of `*.toml` / `*.json` definition files
    pub definitions_dir: Option<PathBuf>,
    /// Periodic full reconcile even without change notifications
    #[serde(with = "duration_str")]
    pub resync_interval: Duration,
    /// A success older than `stale_factor` schedule periods is stale
    pub stale_factor: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { definitions_dir: None, resync_interval: Duration::from_secs(300), stale_factor: 2 }
    }
}

/// Status store settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Optional JSON snapshot file, loaded at startup and rewritten on change
    pub snapshot_path: Option<PathBuf>,
}

/// Outbound HTTP client settings shared by adapters and push sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub user_agent: String,
    /// Attempts per request, including the first
    pub max_attempts: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("dora-engine/", env!("CARGO_PKG_VERSION")).to_string(),
            max_attempts: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
[scheduler]
worker_slots = 8
run_timeout = "45s"
jitter = "equal"
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.worker_slots, 8);
        assert_eq!(config.scheduler.run_timeout, Duration::from_secs(45));
        assert_eq!(config.scheduler.jitter, Jitter::Equal);
        assert_eq!(config.scheduler.retry_ceiling, 3);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let mut config = EngineConfig::default();
        config.scheduler.worker_slots = 0;
        assert!(matches!(config.validate(), Err(DoraError::Config(_))));

        let mut config = EngineConfig::default();
        config.scheduler.backoff_base = Duration::from_secs(3600);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.exposition.listen_addr = "not-an-address".into();
        assert!(config.validate().is_err());
    }
}
