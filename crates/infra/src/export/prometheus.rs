//! Prometheus pull exporter
//!
//! Results update gauges in a registry owned by the engine; the exposition
//! server renders it on `/metrics`. Every series written for a
//! (definition, indicator) is remembered so it can be removed when the
//! indicator or its definition goes away.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dora_core::{Sink, SinkMode};
use dora_domain::constants::{LABEL_SERVICE, LABEL_TEAM};
use dora_domain::{DoraError, EntryKey, MetricOutcome, MetricResult, Result, SinkError};
use parking_lot::Mutex;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

/// Sink type name
pub const TYPE: &str = "prometheus";

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Default)]
struct Series {
    unit: Option<&'static str>,
    groups: BTreeSet<(String, String)>,
    statistics: Vec<&'static str>,
    level: bool,
    success: bool,
    last_success: bool,
}

/// Gauges shared by every prometheus sink of every definition
pub struct PrometheusExporter {
    registry: Registry,
    value: GaugeVec,
    group_value: GaugeVec,
    statistic: GaugeVec,
    performance_level: GaugeVec,
    collection_success: GaugeVec,
    last_success: GaugeVec,
    series: Mutex<HashMap<EntryKey, Series>>,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").field("series", &self.series.lock().len()).finish_non_exhaustive()
    }
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)
        .map_err(|e| DoraError::Internal(format!("invalid metric {name}: {e}")))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| DoraError::Internal(format!("failed to register {name}: {e}")))?;
    Ok(gauge)
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            value: gauge(
                &registry,
                "dora_indicator_value",
                "Latest successful indicator value",
                &["definition", "indicator", "unit"],
            )?,
            group_value: gauge(
                &registry,
                "dora_indicator_group_value",
                "Latest successful indicator value per service and team",
                &["definition", "indicator", "service", "team"],
            )?,
            statistic: gauge(
                &registry,
                "dora_indicator_statistic",
                "Distribution statistics of the latest successful value",
                &["definition", "indicator", "statistic"],
            )?,
            performance_level: gauge(
                &registry,
                "dora_performance_level",
                "DORA performance level (1 = Low .. 4 = Elite)",
                &["definition", "indicator"],
            )?,
            collection_success: gauge(
                &registry,
                "dora_collection_success",
                "Whether the most recent collection run completed without a fault",
                &["definition", "indicator"],
            )?,
            last_success: gauge(
                &registry,
                "dora_last_success_timestamp_seconds",
                "Unix time of the latest successful collection",
                &["definition", "indicator"],
            )?,
            registry,
            series: Mutex::new(HashMap::new()),
        })
    }

    /// Update gauges from a result
    ///
    /// Faults only clear the success flag. Exclusions such as insufficient
    /// data leave every gauge as it was and keep the flag set.
    pub fn observe(&self, result: &MetricResult, labels: &BTreeMap<String, String>) {
        let key = EntryKey::new(result.definition.clone(), result.indicator);
        let definition = result.definition.as_str();
        let indicator = result.indicator.as_str();
        let pair = [definition, indicator];

        let mut series = self.series.lock();
        let tracked = series.entry(key).or_default();

        let (value, performance_level) = match &result.outcome {
            MetricOutcome::Success { value, performance_level } => (value, performance_level),
            MetricOutcome::Failure { error } => {
                let completed = if error.category.is_exclusion() { 1.0 } else { 0.0 };
                self.collection_success.with_label_values(&pair).set(completed);
                tracked.success = true;
                return;
            }
        };

        let unit = value.unit.as_str();
        if let Some(previous) = tracked.unit.filter(|u| *u != unit) {
            let _ = self.value.remove_label_values(&[definition, indicator, previous]);
        }
        self.value.with_label_values(&[definition, indicator, unit]).set(value.value);
        tracked.unit = Some(unit);

        let default_team = labels.get(LABEL_TEAM).map(String::as_str).unwrap_or_default();
        let groups: Vec<(String, String, f64)> = value
            .groups
            .iter()
            .map(|group| {
                let service = group.labels.get(LABEL_SERVICE).map(String::as_str).unwrap_or_default();
                let team = group.labels.get(LABEL_TEAM).map(String::as_str).unwrap_or(default_team);
                (service.to_string(), team.to_string(), group.value)
            })
            .collect();
        let current: BTreeSet<(String, String)> =
            groups.iter().map(|(service, team, _)| (service.clone(), team.clone())).collect();
        for (service, team) in tracked.groups.difference(&current) {
            let _ = self.group_value.remove_label_values(&[definition, indicator, service.as_str(), team.as_str()]);
        }
        for (service, team, group_value) in &groups {
            self.group_value.with_label_values(&[definition, indicator, service.as_str(), team.as_str()]).set(*group_value);
        }
        tracked.groups = current;

        match &value.summary {
            Some(summary) => {
                let statistics = summary.statistics();
                for (name, stat) in statistics {
                    self.statistic.with_label_values(&[definition, indicator, name]).set(stat);
                }
                tracked.statistics = statistics.iter().map(|(name, _)| *name).collect();
            }
            None => {
                for name in tracked.statistics.drain(..) {
                    let _ = self.statistic.remove_label_values(&[definition, indicator, name]);
                }
            }
        }

        self.performance_level.with_label_values(&pair).set(f64::from(performance_level.score()));
        self.collection_success.with_label_values(&pair).set(1.0);
        #[allow(clippy::cast_precision_loss)]
        self.last_success.with_label_values(&pair).set(result.computed_at.timestamp() as f64);
        tracked.level = true;
        tracked.success = true;
        tracked.last_success = true;
    }

    /// Drop every series exported for `key`
    pub fn remove(&self, key: &EntryKey) {
        let Some(tracked) = self.series.lock().remove(key) else {
            return;
        };
        let definition = key.definition.as_str();
        let indicator = key.indicator.as_str();
        let pair = [definition, indicator];

        if let Some(unit) = tracked.unit {
            let _ = self.value.remove_label_values(&[definition, indicator, unit]);
        }
        for (service, team) in &tracked.groups {
            let _ = self.group_value.remove_label_values(&[definition, indicator, service.as_str(), team.as_str()]);
        }
        for name in tracked.statistics {
            let _ = self.statistic.remove_label_values(&[definition, indicator, name]);
        }
        if tracked.level {
            let _ = self.performance_level.remove_label_values(&pair);
        }
        if tracked.success {
            let _ = self.collection_success.remove_label_values(&pair);
        }
        if tracked.last_success {
            let _ = self.last_success.remove_label_values(&pair);
        }
        debug!(key = %key, "removed exported series");
    }

    /// Keys with at least one exported series
    pub fn keys(&self) -> Vec<EntryKey> {
        let mut keys: Vec<EntryKey> = self.series.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| DoraError::Internal(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| DoraError::Internal(format!("metrics are not utf-8: {e}")))
    }
}

/// A definition's prometheus sink; all of them write to one exporter
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    name: String,
    exporter: Arc<PrometheusExporter>,
}

impl PrometheusSink {
    pub fn new(name: impl Into<String>, exporter: Arc<PrometheusExporter>) -> Self {
        Self { name: name.into(), exporter }
    }
}

#[async_trait]
impl Sink for PrometheusSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        SinkMode::Pull
    }

    async fn deliver(&self, result: &MetricResult, labels: &BTreeMap<String, String>) -> std::result::Result<(), SinkError> {
        self.exporter.observe(result, labels);
        Ok(())
    }

    async fn retract(&self, key: &EntryKey) -> std::result::Result<(), SinkError> {
        self.exporter.remove(key);
        Ok(())
    }
}
