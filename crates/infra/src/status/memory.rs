//! Sharded in-memory status store with optional JSON snapshot
//!
//! Each key lives in one `DashMap` shard, so updates to the same
//! (definition, indicator) are serialized by the shard lock while different
//! keys proceed in parallel. When a snapshot path is configured, every
//! applied change rewrites the snapshot (temp file + rename).

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use dora_core::StatusStore;
use dora_domain::{DoraError, EntryKey, MetricResult, Result, StatusRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::InfraError;
use crate::fs::write_atomically;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<StatusRecord>,
}

/// Status store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: DashMap<EntryKey, StatusRecord>,
    snapshot_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that persists to `path`, seeded from it when the file exists
    ///
    /// # Errors
    /// `DoraError::Store` if an existing snapshot cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = DashMap::new();

        if tokio::fs::try_exists(&path).await.map_err(InfraError::from)? {
            let contents = tokio::fs::read_to_string(&path).await.map_err(InfraError::from)?;
            let snapshot: Snapshot = serde_json::from_str(&contents).map_err(|e| {
                DoraError::Store(format!("invalid status snapshot {}: {e}", path.display()))
            })?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(DoraError::Store(format!(
                    "unsupported status snapshot version {} in {}",
                    snapshot.version,
                    path.display()
                )));
            }
            for record in snapshot.records {
                records.insert(EntryKey::new(record.definition.clone(), record.indicator), record);
            }
            info!(path = %path.display(), records = records.len(), "status snapshot loaded");
        }

        Ok(Self { records, snapshot_path: Some(path), persist_lock: Mutex::new(()) })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted(&self, filter: impl Fn(&EntryKey) -> bool) -> Vec<StatusRecord> {
        let mut records: Vec<(EntryKey, StatusRecord)> = self
            .records
            .iter()
            .filter(|r| filter(r.key()))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records.into_iter().map(|(_, record)| record).collect()
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        // taken under the lock: the last writer holds the newest state
        let _guard = self.persist_lock.lock().await;
        let snapshot = Snapshot { version: SNAPSHOT_VERSION, records: self.sorted(|_| true) };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(InfraError::from)?;
        write_atomically(path, &bytes).await?;
        debug!(path = %path.display(), records = snapshot.records.len(), "status snapshot written");
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to write status snapshot");
        }
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn apply(&self, result: &MetricResult) -> Result<bool> {
        let key = EntryKey::new(result.definition.clone(), result.indicator);
        let changed = {
            let mut record = self
                .records
                .entry(key.clone())
                .or_insert_with(|| StatusRecord::new(key.definition.clone(), key.indicator));
            record.apply(result)
        };

        if changed {
            self.persist().await?;
        } else {
            debug!(entry = %key, window_end = %result.window.end, "stale result discarded");
        }
        Ok(changed)
    }

    async fn get(&self, key: &EntryKey) -> Result<Option<StatusRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<StatusRecord>> {
        Ok(self.sorted(|_| true))
    }

    async fn list_definition(&self, definition: &str) -> Result<Vec<StatusRecord>> {
        Ok(self.sorted(|key| key.definition == definition))
    }

    async fn remove(&self, key: &EntryKey) -> Result<bool> {
        let removed = self.records.remove(key).is_some();
        if removed {
            self.persist_logged().await;
        }
        Ok(removed)
    }

    async fn remove_definition(&self, definition: &str) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|key, _| key.definition != definition);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            self.persist_logged().await;
        }
        Ok(removed)
    }
}
