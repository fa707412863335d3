//! Port interface for export sinks

use std::collections::BTreeMap;

use async_trait::async_trait;
use dora_domain::{EntryKey, MetricResult, SinkError};

/// How a sink receives results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Results update local state that is scraped later
    Pull,
    /// Results are sent to a remote endpoint and may be retried
    Push,
}

/// Trait for delivering results to an external consumer
#[async_trait]
pub trait Sink: Send + Sync {
    /// Display name used in logs and dead letters
    fn name(&self) -> &str;

    fn mode(&self) -> SinkMode;

    /// Deliver one result; `labels` are the definition's static labels
    async fn deliver(&self, result: &MetricResult, labels: &BTreeMap<String, String>) -> Result<(), SinkError>;

    /// Forget everything exported for `key`
    async fn retract(&self, _key: &EntryKey) -> Result<(), SinkError> {
        Ok(())
    }
}
