//! Directory-of-files definition source
//!
//! Every `*.toml` / `*.json` file directly inside the directory holds one
//! definition. The engine-owned status is written to `status/<name>.json`
//! next to the definitions, never into the client's file. Changes are
//! detected by polling file names, sizes and modification times.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use dora_core::DefinitionSource;
use dora_domain::{DefinitionStatus, DoraError, MetricDefinition, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::InfraError;
use crate::fs::write_atomically;

const STATUS_DIR: &str = "status";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One definition file and what it parsed to
#[derive(Debug)]
pub struct LoadedDefinition {
    pub path: PathBuf,
    pub definition: Result<MetricDefinition>,
}

/// Parse a definition document; the format follows the file extension
///
/// # Errors
/// `DoraError::Validation` for malformed documents or unknown extensions.
pub fn parse_definition(contents: &str, path: &Path) -> Result<MetricDefinition> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| DoraError::Validation(format!("{}: invalid TOML definition: {}", path.display(), e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| DoraError::Validation(format!("{}: invalid JSON definition: {}", path.display(), e))),
        other => Err(DoraError::Validation(format!(
            "{}: unsupported definition format '{}'",
            path.display(),
            other
        ))),
    }
}

fn is_definition_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("toml" | "json"))
}

/// Definitions read from a directory
#[derive(Debug)]
pub struct FileDefinitionSource {
    dir: PathBuf,
    status_dir: PathBuf,
    poll_interval: Duration,
    changes: watch::Sender<u64>,
}

impl FileDefinitionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let (changes, _) = watch::channel(0);
        Self { status_dir: dir.join(STATUS_DIR), dir, poll_interval: DEFAULT_POLL_INTERVAL, changes }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn status_path(&self, name: &str) -> PathBuf {
        self.status_dir.join(format!("{name}.json"))
    }

    /// Definition files, sorted by path
    async fn files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            DoraError::Config(format!("cannot read definitions directory {}: {}", self.dir.display(), e))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(InfraError::from)? {
            let path = entry.path();
            if is_definition_file(&path) && entry.file_type().await.map_err(InfraError::from)?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every definition file with its parse outcome
    ///
    /// # Errors
    /// `DoraError::Config` if the directory cannot be read.
    pub async fn load_all(&self) -> Result<Vec<LoadedDefinition>> {
        let mut loaded = Vec::new();
        for path in self.files().await? {
            let definition = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => parse_definition(&contents, &path),
                Err(e) => Err(DoraError::Config(format!("cannot read {}: {}", path.display(), e))),
            };
            loaded.push(LoadedDefinition { path, definition });
        }
        Ok(loaded)
    }

    async fn read_status(&self, name: &str) -> Option<DefinitionStatus> {
        let contents = tokio::fs::read_to_string(self.status_path(name)).await.ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Hash of file names, sizes and modification times
    async fn fingerprint(&self) -> Result<u64> {
        let mut hasher = DefaultHasher::new();
        for path in self.files().await? {
            let metadata = tokio::fs::metadata(&path).await.map_err(InfraError::from)?;
            path.hash(&mut hasher);
            metadata.len().hash(&mut hasher);
            metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH).hash(&mut hasher);
        }
        Ok(hasher.finish())
    }

    /// Poll the directory until `cancel` fires, notifying subscribers of
    /// every change
    pub async fn watch(&self, cancel: CancellationToken) {
        let mut last = self.fingerprint().await.ok();
        info!(dir = %self.dir.display(), interval = ?self.poll_interval, "watching definitions directory");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("definition watcher cancelled");
                    break;
                }
                () = tokio::time::sleep(self.poll_interval) => {
                    match self.fingerprint().await {
                        Ok(current) if last != Some(current) => {
                            debug!(dir = %self.dir.display(), "definitions changed");
                            last = Some(current);
                            self.changes.send_modify(|generation| *generation += 1);
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "failed to scan definitions directory"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DefinitionSource for FileDefinitionSource {
    async fn list(&self) -> Result<Vec<MetricDefinition>> {
        let mut definitions: Vec<MetricDefinition> = Vec::new();

        for loaded in self.load_all().await? {
            match loaded.definition {
                Ok(mut definition) => {
                    if definitions.iter().any(|d| d.name == definition.name) {
                        warn!(
                            definition = %definition.name,
                            path = %loaded.path.display(),
                            "duplicate definition name ignored"
                        );
                        continue;
                    }
                    definition.status = self.read_status(&definition.name).await;
                    definitions.push(definition);
                }
                Err(e) => {
                    warn!(path = %loaded.path.display(), error = %e, "skipping unparsable definition");
                    if let Some(stem) = loaded.path.file_stem().and_then(|s| s.to_str()) {
                        let status = DefinitionStatus::invalid(Utc::now(), e.to_string());
                        if let Err(e) = self.update_status(stem, status).await {
                            warn!(path = %loaded.path.display(), error = %e, "failed to write status");
                        }
                    }
                }
            }
        }

        Ok(definitions)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    async fn update_status(&self, name: &str, status: DefinitionStatus) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&status).map_err(InfraError::from)?;
        write_atomically(&self.status_path(name), &bytes).await
    }
}
