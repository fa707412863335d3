//! Port interface for the status store

use async_trait::async_trait;
use dora_domain::{EntryKey, MetricResult, Result, StatusRecord};

/// Trait for persisting the latest result per (definition, indicator)
///
/// Implementations must apply updates monotonically by window end and keep
/// updates to one key linearizable.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Apply a completed run; returns whether the record changed
    async fn apply(&self, result: &MetricResult) -> Result<bool>;

    async fn get(&self, key: &EntryKey) -> Result<Option<StatusRecord>>;

    /// All records, ordered by key
    async fn list(&self) -> Result<Vec<StatusRecord>>;

    /// Records of one definition, ordered by indicator
    async fn list_definition(&self, definition: &str) -> Result<Vec<StatusRecord>>;

    /// Drop a single record; returns whether it existed
    async fn remove(&self, key: &EntryKey) -> Result<bool>;

    /// Drop every record of a definition; returns how many were removed
    async fn remove_definition(&self, definition: &str) -> Result<usize>;
}
