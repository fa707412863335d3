//! Definition → runtime reconciliation

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dora_common::{Clock, Schedule};
use dora_core::{
    validate_definition, BoundSource, CollectionPlan, DefinitionSource, ScheduleRegistry, Sink, StatusStore,
    UpsertOutcome,
};
use dora_domain::{
    ControllerConfig, DefinitionStatus, DoraError, EntryKey, IndicatorSpec, IndicatorStatus, MetricDefinition, Result,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::components::Components;
use crate::export::ExportDispatcher;

/// What one reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub valid: usize,
    pub invalid: usize,
    pub added: usize,
    pub updated: usize,
    /// Entries removed from definitions that still exist
    pub dropped: usize,
    /// Definitions that disappeared
    pub removed: usize,
    pub statuses_written: usize,
}

/// Everything a valid definition turns into
struct Desired {
    entries: Vec<(EntryKey, Schedule, Arc<CollectionPlan>, String)>,
    sinks: Vec<Arc<dyn Sink>>,
    sink_fingerprint: String,
}

/// Level-triggered reconciler between definitions and the runtime
pub struct Reconciler {
    source: Arc<dyn DefinitionSource>,
    components: Arc<Components>,
    registry: Arc<ScheduleRegistry>,
    status: Arc<dyn StatusStore>,
    dispatcher: Arc<ExportDispatcher>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    wake: Option<Arc<Notify>>,
    sink_fingerprints: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("entries", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn fingerprint<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl Reconciler {
    pub fn new(
        config: &ControllerConfig,
        source: Arc<dyn DefinitionSource>,
        components: Arc<Components>,
        registry: Arc<ScheduleRegistry>,
        status: Arc<dyn StatusStore>,
        dispatcher: Arc<ExportDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            components,
            registry,
            status,
            dispatcher,
            clock,
            config: config.clone(),
            wake: None,
            sink_fingerprints: Mutex::new(HashMap::new()),
        }
    }

    /// Notify `wake` whenever entries are added or rescheduled
    #[must_use]
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Reconcile until cancelled
    ///
    /// A pass runs at start, on every definition change, on every status
    /// change and every `resync_interval`.
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: CancellationToken, status_changed: Arc<Notify>) {
        let mut changes = self.source.subscribe();
        let mut changes_open = true;
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(resync_interval = ?self.config.resync_interval, "Reconciliation controller started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Reconciliation loop cancelled");
                    break;
                }
                changed = changes.changed(), if changes_open => {
                    if changed.is_err() {
                        warn!("definition source closed its change feed; relying on resync");
                        changes_open = false;
                        continue;
                    }
                    debug!("definition change observed");
                }
                () = status_changed.notified() => {}
                _ = resync.tick() => {}
            }

            if let Err(e) = self.reconcile_once().await {
                error!(error = %e, "reconcile pass failed");
            }
        }
        info!("Reconciliation controller stopped");
    }

    /// Read the full desired state and converge on it
    #[instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let definitions = self.source.list().await?;
        let now = self.clock.now();
        let mut report = ReconcileReport::default();
        let mut scheduled = false;

        let desired_names: BTreeSet<String> = definitions.iter().map(|d| d.name.clone()).collect();

        for definition in &definitions {
            let status = match self.desired(definition) {
                Ok(desired) => {
                    report.valid += 1;
                    scheduled |= self.apply(definition, desired, now, &mut report).await?;
                    self.definition_status(definition, now).await?
                }
                Err(e) => {
                    report.invalid += 1;
                    let message = match e {
                        DoraError::Validation(message) => message,
                        other => other.to_string(),
                    };
                    warn!(definition = %definition.name, error = %message, "definition is invalid");
                    self.withdraw(&definition.name).await?;
                    DefinitionStatus::invalid(now, message)
                }
            };

            if definition.status.as_ref().map_or(true, |current| !current.same_content(&status)) {
                self.source.update_status(&definition.name, status).await?;
                report.statuses_written += 1;
            }
        }

        for name in self.known_definitions().await? {
            if !desired_names.contains(&name) {
                self.withdraw(&name).await?;
                let forgotten = self.status.remove_definition(&name).await?;
                info!(definition = %name, records = forgotten, "definition removed");
                report.removed += 1;
            }
        }

        if scheduled {
            if let Some(wake) = &self.wake {
                wake.notify_one();
            }
        }

        debug!(?report, "reconcile pass complete");
        Ok(report)
    }

    /// Whether a definition would be accepted, building but discarding its
    /// adapters and sinks
    pub fn check(&self, definition: &MetricDefinition) -> Result<()> {
        self.desired(definition).map(|_| ())
    }

    /// Validate a definition and build its plans and sinks without touching
    /// the runtime
    fn desired(&self, definition: &MetricDefinition) -> Result<Desired> {
        validate_definition(definition, self.components.as_ref())?;

        let mut sources = Vec::with_capacity(definition.sources.len());
        for spec in &definition.sources {
            let adapter = self.components.build_source(spec)?;
            sources.push(BoundSource::new(spec.display_name(), adapter, spec.label_filter()));
        }

        let mut entries = Vec::new();
        for spec in definition.enabled_indicators() {
            let schedule = Schedule::parse(&spec.schedule)
                .map_err(|e| DoraError::Validation(format!("indicator {}: {e}", spec.name)))?;
            let plan = CollectionPlan::new(definition.name.clone(), spec.clone(), sources.iter().cloned());
            let print = fingerprint(&(spec, &definition.sources));
            entries.push((plan.key(), schedule, Arc::new(plan), print));
        }

        let sinks = self.components.build_sinks(&definition.sinks)?;
        let sink_fingerprint = fingerprint(&(&definition.sinks, &definition.labels));
        Ok(Desired { entries, sinks, sink_fingerprint })
    }

    /// Converge the runtime on a valid definition; returns whether any
    /// entry became due
    async fn apply(
        &self,
        definition: &MetricDefinition,
        desired: Desired,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<bool> {
        let name = definition.name.as_str();
        let Desired { entries, sinks, sink_fingerprint } = desired;

        // sinks first so the first results of new entries have somewhere to go
        let sinks_changed = self.sink_fingerprints.lock().get(name) != Some(&sink_fingerprint);
        if sinks_changed || !self.dispatcher.is_registered(name) {
            self.dispatcher.register(name, sinks, definition.labels.clone());
            self.sink_fingerprints.lock().insert(name.to_string(), sink_fingerprint);
            info!(definition = name, sinks = definition.sinks.len(), "export sinks registered");
        }

        let mut scheduled = false;
        let wanted: BTreeSet<EntryKey> = entries.iter().map(|(key, ..)| key.clone()).collect();
        for (key, schedule, plan, print) in entries {
            match self.registry.upsert(key.clone(), schedule, plan, print, now) {
                UpsertOutcome::Added => {
                    info!(key = %key, "collection entry added");
                    report.added += 1;
                    scheduled = true;
                }
                UpsertOutcome::Updated => {
                    info!(key = %key, "collection entry updated");
                    report.updated += 1;
                    scheduled = true;
                }
                UpsertOutcome::Unchanged => {}
            }
        }

        let stale: Vec<EntryKey> =
            self.registry.keys_for(name).into_iter().filter(|key| !wanted.contains(key)).collect();
        for key in &stale {
            self.registry.remove(key);
            self.status.remove(key).await?;
            info!(key = %key, "collection entry removed");
        }
        if !stale.is_empty() {
            self.dispatcher.retract(name, &stale).await;
            report.dropped += stale.len();
        }

        Ok(scheduled)
    }

    /// Remove a definition's entries and sinks, retracting exported series
    async fn withdraw(&self, name: &str) -> Result<()> {
        let mut keys: BTreeSet<EntryKey> = self.registry.remove_definition(name).into_iter().collect();
        keys.extend(self.status.list_definition(name).await?.into_iter().map(|r| EntryKey::new(r.definition, r.indicator)));
        let keys: Vec<EntryKey> = keys.into_iter().collect();

        self.dispatcher.unregister(name, &keys).await;
        self.sink_fingerprints.lock().remove(name);
        if !keys.is_empty() {
            debug!(definition = name, entries = keys.len(), "definition withdrawn");
        }
        Ok(())
    }

    /// Definitions the runtime still holds state for
    async fn known_definitions(&self) -> Result<BTreeSet<String>> {
        let mut names: BTreeSet<String> = self.registry.snapshot().into_iter().map(|info| info.key.definition).collect();
        names.extend(self.dispatcher.definitions());
        names.extend(self.status.list().await?.into_iter().map(|record| record.definition));
        Ok(names)
    }

    /// Status sub-object of a valid definition
    async fn definition_status(&self, definition: &MetricDefinition, now: DateTime<Utc>) -> Result<DefinitionStatus> {
        let records: BTreeMap<_, _> = self
            .status
            .list_definition(&definition.name)
            .await?
            .into_iter()
            .map(|record| (record.indicator, record))
            .collect();

        let indicators = definition
            .enabled_indicators()
            .map(|spec| {
                let key = EntryKey::new(definition.name.clone(), spec.name);
                let next_due = self.registry.info(&key).and_then(|info| info.next_due);
                match records.get(&spec.name) {
                    Some(record) => {
                        let stale_after = self.stale_after(&key, spec, record.last_success_at.unwrap_or(now));
                        IndicatorStatus::from_record(record, record.health(now, stale_after), next_due)
                    }
                    None => IndicatorStatus::pending(spec.name, next_due),
                }
            })
            .collect();

        Ok(DefinitionStatus { observed_at: now, valid: true, validation_error: None, indicators })
    }

    /// `stale_factor` schedule periods
    fn stale_after(&self, key: &EntryKey, spec: &IndicatorSpec, from: DateTime<Utc>) -> Duration {
        let schedule = self.registry.schedule(key).or_else(|| Schedule::parse(&spec.schedule).ok());
        schedule
            .and_then(|schedule| schedule.period_after(from))
            .map_or(Duration::MAX, |period| period.saturating_mul(self.config.stale_factor))
    }
}
