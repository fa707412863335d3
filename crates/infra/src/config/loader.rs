//! Configuration loader
//!
//! Loads engine configuration from a file and environment variables.
//!
//! ## Loading Strategy
//! 1. Reads the given file, or probes the standard locations for one
//! 2. Falls back to defaults when no file exists
//! 3. Applies `DORA_*` environment overrides
//! 4. Validates the result
//!
//! ## Environment Variables
//! - `DORA_WORKER_SLOTS`: Parallel collection runs
//! - `DORA_RUN_TIMEOUT`: Per-run deadline (`90s`, `2m`)
//! - `DORA_EXPOSITION_ADDR`: Listen address of the exposition endpoint
//! - `DORA_EXPOSITION_ENABLED`: Whether to serve the endpoint (true/false)
//! - `DORA_DEFINITIONS_DIR`: Directory of metric definition files
//! - `DORA_RESYNC_INTERVAL`: Full reconcile interval (`5m`)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./dora.toml` or `./dora.json` (current working directory)
//! 2. `./config/dora.toml` or `./config/dora.json`
//! 3. Relative to executable location

use std::path::{Path, PathBuf};
use std::time::Duration;

use dora_common::parse_duration;
use dora_domain::{DoraError, EngineConfig, Result};

/// Load configuration from `path` (or a probed file), then the environment
///
/// # Errors
/// Returns `DoraError::Config` if:
/// - An explicit `path` does not exist
/// - File format is invalid
/// - An override has an invalid value
/// - The merged configuration fails validation
pub fn load(path: Option<PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => load_from_file(Some(path))?,
        None => match probe_config_paths() {
            Some(found) => load_from_file(Some(found))?,
            None => {
                tracing::info!("No config file found, using defaults");
                EngineConfig::default()
            }
        },
    };

    let config = apply_env_overrides(config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `DoraError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<EngineConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(DoraError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            DoraError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| DoraError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<EngineConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| DoraError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| DoraError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(DoraError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Apply `DORA_*` environment overrides on top of `config`
///
/// # Errors
/// Returns `DoraError::Config` if a variable is set to an unparsable value.
pub fn apply_env_overrides(mut config: EngineConfig) -> Result<EngineConfig> {
    if let Some(slots) = env_var("DORA_WORKER_SLOTS") {
        config.scheduler.worker_slots = slots
            .parse::<usize>()
            .map_err(|e| DoraError::Config(format!("Invalid DORA_WORKER_SLOTS: {}", e)))?;
    }
    if let Some(timeout) = env_var("DORA_RUN_TIMEOUT") {
        config.scheduler.run_timeout = env_duration("DORA_RUN_TIMEOUT", &timeout)?;
    }
    if let Some(addr) = env_var("DORA_EXPOSITION_ADDR") {
        config.exposition.listen_addr = addr;
    }
    config.exposition.enabled = env_bool("DORA_EXPOSITION_ENABLED", config.exposition.enabled);
    if let Some(dir) = env_var("DORA_DEFINITIONS_DIR") {
        config.controller.definitions_dir = Some(PathBuf::from(dir));
    }
    if let Some(interval) = env_var("DORA_RESYNC_INTERVAL") {
        config.controller.resync_interval = env_duration("DORA_RESYNC_INTERVAL", &interval)?;
    }
    Ok(config)
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(vec![
            cwd.join("dora.toml"),
            cwd.join("dora.json"),
            cwd.join("config/dora.toml"),
            cwd.join("config/dora.json"),
        ]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(vec![exe_dir.join("dora.toml"), exe_dir.join("dora.json")]);
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_duration(key: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| DoraError::Config(format!("Invalid {}: {}", key, e)))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const OVERRIDE_KEYS: [&str; 6] = [
        "DORA_WORKER_SLOTS",
        "DORA_RUN_TIMEOUT",
        "DORA_EXPOSITION_ADDR",
        "DORA_EXPOSITION_ENABLED",
        "DORA_DEFINITIONS_DIR",
        "DORA_RESYNC_INTERVAL",
    ];

    fn clear_overrides() {
        for key in OVERRIDE_KEYS {
            std::env::remove_var(key);
        }
    }

    fn temp_config(extension: &str, contents: &str) -> (NamedTempFile, PathBuf) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let path = file.path().with_extension(extension);
        std::fs::copy(file.path(), &path).unwrap();
        (file, path)
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        std::env::set_var("DORA_TEST_BOOL_YES", "yes");
        std::env::set_var("DORA_TEST_BOOL_UPPER", "TRUE");
        std::env::set_var("DORA_TEST_BOOL_OFF", "off");

        assert!(env_bool("DORA_TEST_BOOL_YES", false));
        assert!(env_bool("DORA_TEST_BOOL_UPPER", false));
        assert!(!env_bool("DORA_TEST_BOOL_OFF", true));

        std::env::remove_var("DORA_TEST_BOOL_MISSING");
        assert!(env_bool("DORA_TEST_BOOL_MISSING", true));

        std::env::remove_var("DORA_TEST_BOOL_YES");
        std::env::remove_var("DORA_TEST_BOOL_UPPER");
        std::env::remove_var("DORA_TEST_BOOL_OFF");
    }

    #[test]
    fn test_parse_toml_and_json() {
        let toml = parse_config("[scheduler]\nworker_slots = 2\n", Path::new("dora.toml")).unwrap();
        assert_eq!(toml.scheduler.worker_slots, 2);

        let json =
            parse_config(r#"{"export": {"push_attempts": 5}}"#, Path::new("dora.json")).unwrap();
        assert_eq!(json.export.push_attempts, 5);

        assert!(parse_config("", Path::new("dora.yaml")).is_err());
        assert!(parse_config("{not json", Path::new("dora.json")).is_err());
    }

    #[test]
    fn test_env_overrides_apply_on_top_of_file() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        let (_file, path) = temp_config(
            "toml",
            "[scheduler]\nworker_slots = 2\nrun_timeout = \"30s\"\n[controller]\nresync_interval = \"1m\"\n",
        );

        std::env::set_var("DORA_WORKER_SLOTS", "6");
        std::env::set_var("DORA_RESYNC_INTERVAL", "90s");
        std::env::set_var("DORA_DEFINITIONS_DIR", "/etc/dora/definitions");

        let config = load(Some(path.clone())).unwrap();
        assert_eq!(config.scheduler.worker_slots, 6);
        assert_eq!(config.scheduler.run_timeout, Duration::from_secs(30));
        assert_eq!(config.controller.resync_interval, Duration::from_secs(90));
        assert_eq!(
            config.controller.definitions_dir,
            Some(PathBuf::from("/etc/dora/definitions"))
        );

        clear_overrides();
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_overrides();

        std::env::set_var("DORA_RUN_TIMEOUT", "soon");
        let result = apply_env_overrides(EngineConfig::default());
        assert!(matches!(result, Err(DoraError::Config(msg)) if msg.contains("DORA_RUN_TIMEOUT")));

        std::env::set_var("DORA_RUN_TIMEOUT", "45s");
        std::env::set_var("DORA_WORKER_SLOTS", "0");
        let config = apply_env_overrides(EngineConfig::default()).unwrap();
        assert!(config.validate().is_err());

        clear_overrides();
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/dora.toml")));
        assert!(matches!(result, Err(DoraError::Config(msg)) if msg.contains("not found")));
    }
}
