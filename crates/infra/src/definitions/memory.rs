//! In-memory definition source with an apply/delete API

use std::collections::BTreeMap;

use async_trait::async_trait;
use dora_core::DefinitionSource;
use dora_domain::{DefinitionStatus, MetricDefinition, Result};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

/// Definitions held in memory, as a client API would own them
#[derive(Debug)]
pub struct InMemoryDefinitionSource {
    definitions: RwLock<BTreeMap<String, MetricDefinition>>,
    changes: watch::Sender<u64>,
}

impl Default for InMemoryDefinitionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDefinitionSource {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self { definitions: RwLock::new(BTreeMap::new()), changes }
    }

    /// Create or replace a definition
    ///
    /// The engine-owned status is kept; subscribers are notified only when
    /// the client-owned content changed.
    pub fn apply(&self, mut definition: MetricDefinition) {
        let changed = {
            let mut definitions = self.definitions.write();
            let existing = definitions.get(&definition.name);
            let changed = existing.map_or(true, |old| old.without_status() != definition.without_status());
            definition.status = existing.and_then(|old| old.status.clone());
            definitions.insert(definition.name.clone(), definition);
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// Delete a definition; returns whether it existed
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.definitions.write().remove(name).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<MetricDefinition> {
        self.definitions.read().get(name).cloned()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

#[async_trait]
impl DefinitionSource for InMemoryDefinitionSource {
    async fn list(&self) -> Result<Vec<MetricDefinition>> {
        Ok(self.definitions.read().values().cloned().collect())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    async fn update_status(&self, name: &str, status: DefinitionStatus) -> Result<()> {
        match self.definitions.write().get_mut(name) {
            Some(definition) => definition.status = Some(status),
            None => debug!(definition = name, "status for deleted definition dropped"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use dora_domain::{Indicator, IndicatorSpec};

    use super::*;

    fn definition(schedule: &str) -> MetricDefinition {
        MetricDefinition {
            name: "payments".into(),
            labels: BTreeMap::new(),
            indicators: vec![IndicatorSpec::new(Indicator::DeploymentFrequency, schedule)],
            sources: Vec::new(),
            sinks: Vec::new(),
            status: None,
        }
    }

    #[tokio::test]
    async fn notifies_on_content_changes_only() {
        let source = InMemoryDefinitionSource::new();
        let mut changes = source.subscribe();

        source.apply(definition("1h"));
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        source.apply(definition("1h"));
        assert!(!changes.has_changed().unwrap());

        source.update_status("payments", DefinitionStatus::invalid(Utc::now(), "bad")).await.unwrap();
        assert!(!changes.has_changed().unwrap());

        source.apply(definition("2h"));
        assert!(changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn apply_keeps_engine_status() {
        let source = InMemoryDefinitionSource::new();
        source.apply(definition("1h"));
        source.update_status("payments", DefinitionStatus::invalid(Utc::now(), "bad")).await.unwrap();

        source.apply(definition("2h"));
        let stored = source.get("payments").unwrap();
        assert_eq!(stored.indicators[0].schedule, "2h");
        assert!(stored.status.is_some());

        assert!(source.delete("payments"));
        assert!(source.list().await.unwrap().is_empty());
        assert!(source.update_status("payments", DefinitionStatus::invalid(Utc::now(), "x")).await.is_ok());
    }
}
