//! Metric definitions: the declarative input of the engine
//!
//! A definition is owned by its client. The engine only ever writes the
//! `status` sub-object.

use std::collections::BTreeMap;
use std::time::Duration;

use dora_common::{duration_str, option_duration_str};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MIN_DEPLOYMENTS, DEFAULT_WINDOW};
use crate::types::{DefinitionStatus, Indicator, LabelFilter, TimeRange};

/// Declares what to collect, from where, and where to export it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    /// Static labels attached to every export (for example `team`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub indicators: Vec<IndicatorSpec>,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub sinks: Vec<SinkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DefinitionStatus>,
}

impl MetricDefinition {
    pub fn enabled_indicators(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.indicators.iter().filter(|spec| spec.enabled)
    }

    pub fn indicator(&self, indicator: Indicator) -> Option<&IndicatorSpec> {
        self.indicators.iter().find(|spec| spec.name == indicator)
    }

    /// Copy without the engine-owned status, used to detect client changes
    #[must_use]
    pub fn without_status(&self) -> Self {
        Self { status: None, ..self.clone() }
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> Duration {
    DEFAULT_WINDOW
}

fn default_min_deployments() -> usize {
    DEFAULT_MIN_DEPLOYMENTS
}

/// One indicator to collect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub name: Indicator,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Schedule expression (`15m`, `@hourly`, `*/30 * * * *`)
    pub schedule: String,
    /// Length of the trailing window each run aggregates over
    #[serde(default = "default_window", with = "duration_str")]
    pub window: Duration,
    /// Deployment environments to include; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
    /// Change failure rate is undefined below this many deployments
    #[serde(default = "default_min_deployments")]
    pub min_deployments: usize,
    /// How long after a deployment an incident counts as caused by it
    #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub incident_correlation_window: Option<Duration>,
    /// Maintenance windows excluded from recovery times
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_windows: Vec<TimeRange>,
}

impl IndicatorSpec {
    pub fn new(name: Indicator, schedule: impl Into<String>) -> Self {
        Self {
            name,
            enabled: true,
            schedule: schedule.into(),
            window: DEFAULT_WINDOW,
            environments: Vec::new(),
            min_deployments: DEFAULT_MIN_DEPLOYMENTS,
            incident_correlation_window: None,
            excluded_windows: Vec::new(),
        }
    }
}

/// Source adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Adapter registry key (`github`, `pagerduty`, `static`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Unique within the definition; defaults to the type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Opaque credential reference, for example `env:GITHUB_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Adapter-specific scope (repositories, service ids, fixture path)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scope: BTreeMap<String, serde_json::Value>,
    /// Label equality filters applied to produced events
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, String>,
}

impl SourceSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            endpoint: None,
            credential: None,
            scope: BTreeMap::new(),
            filters: BTreeMap::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    pub fn label_filter(&self) -> LabelFilter {
        LabelFilter::from(&self.filters)
    }

    /// String list from `scope[key]`; a single string is a one-element list
    pub fn scope_strings(&self, key: &str) -> Vec<String> {
        match self.scope.get(key) {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Export sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Sink type (`prometheus`, `webhook`, `pushgateway`)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SinkSpec {
    pub fn new(kind: impl Into<String>, endpoint: Option<String>) -> Self {
        Self { kind: kind.into(), name: None, endpoint, enabled: true }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION_TOML: &str = r#"
name = "payments"
labels = { team = "checkout" }

[[indicators]]
name = "deployment-frequency"
schedule = "@hourly"

[[indicators]]
name = "change-failure-rate"
schedule = "30m"
window = "14d"
min_deployments = 3
incident_correlation_window = "2h"
enabled = false

[[sources]]
type = "github"
credential = "env:GITHUB_TOKEN"
scope = { repositories = ["acme/payments"] }
filters = { environment = "production" }

[[sinks]]
type = "webhook"
endpoint = "http://hooks.local/dora"
"#;

    #[test]
    fn parses_toml_definition_with_defaults() {
        let def: MetricDefinition = toml::from_str(DEFINITION_TOML).unwrap();

        assert_eq!(def.name, "payments");
        assert_eq!(def.labels.get("team").map(String::as_str), Some("checkout"));

        let df = def.indicator(Indicator::DeploymentFrequency).unwrap();
        assert!(df.enabled);
        assert_eq!(df.window, DEFAULT_WINDOW);
        assert_eq!(df.min_deployments, DEFAULT_MIN_DEPLOYMENTS);

        let cfr = def.indicator(Indicator::ChangeFailureRate).unwrap();
        assert!(!cfr.enabled);
        assert_eq!(cfr.window, Duration::from_secs(14 * 86_400));
        assert_eq!(cfr.incident_correlation_window, Some(Duration::from_secs(7200)));
        assert_eq!(def.enabled_indicators().count(), 1);

        let source = &def.sources[0];
        assert_eq!(source.display_name(), "github");
        assert_eq!(source.scope_strings("repositories"), vec!["acme/payments".to_string()]);
        assert!(!source.label_filter().is_empty());

        assert!(def.sinks[0].enabled);
    }

    #[test]
    fn without_status_strips_engine_owned_fields() {
        let mut def: MetricDefinition = toml::from_str(DEFINITION_TOML).unwrap();
        def.status = Some(DefinitionStatus::invalid(chrono::Utc::now(), "boom"));
        assert!(def.without_status().status.is_none());
    }
}
