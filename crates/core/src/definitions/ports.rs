//! Port interface for metric definition sources

use async_trait::async_trait;
use dora_domain::{DefinitionStatus, MetricDefinition, Result};
use tokio::sync::watch;

/// Trait for reading declarative metric definitions
///
/// Consumers are level-triggered: a change notification only says that
/// something changed, and the full desired state is re-read with
/// [`DefinitionSource::list`].
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Current definitions, including the last written status
    async fn list(&self) -> Result<Vec<MetricDefinition>>;

    /// Receiver whose value changes whenever a definition changes
    ///
    /// Status writes do not count as changes.
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Replace the engine-owned status sub-object of a definition
    async fn update_status(&self, name: &str, status: DefinitionStatus) -> Result<()>;
}
