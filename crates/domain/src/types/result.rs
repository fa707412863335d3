//! Output of one collection run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CollectionError, ErrorCategory};
use crate::types::{Indicator, PerformanceLevel, TimeRange, Unit};

/// Distribution statistics over per-event samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Summary {
    /// Named statistics, in a stable order, for exports
    pub fn statistics(&self) -> [(&'static str, f64); 8] {
        [
            ("mean", self.mean),
            ("median", self.median),
            ("p75", self.p75),
            ("p90", self.p90),
            ("p95", self.p95),
            ("min", self.min),
            ("max", self.max),
            ("stddev", self.stddev),
        ]
    }
}

/// Value for one label group (service/team)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupValue {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub sample_count: usize,
}

/// Rate for one calendar week (Monday 00:00 UTC onwards)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodValue {
    pub start: DateTime<Utc>,
    pub value: f64,
    pub sample_count: usize,
    pub failed: usize,
}

/// Why a deployment counts as a failed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Outcome,
    RolledBack,
    Incident,
}

/// A deployment counted as failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChange {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub cause: FailureCause,
}

/// Week-over-week direction of an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Successful indicator value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Primary value used for classification
    pub value: f64,
    pub unit: Unit,
    /// Number of events or pairs contributing to `value`
    pub sample_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupValue>,
    /// Events dropped by policy (unmatched deployments, unresolved incidents)
    #[serde(default)]
    pub excluded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    /// Weekly breakdown (change failure rate)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub periods: Vec<PeriodValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_failures: Vec<FailedChange>,
}

/// Typed failure recorded for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricError {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&CollectionError> for MetricError {
    fn from(err: &CollectionError) -> Self {
        Self { category: err.category(), message: err.to_string() }
    }
}

/// Success or failure of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MetricOutcome {
    Success { value: MetricValue, performance_level: PerformanceLevel },
    Failure { error: MetricError },
}

/// Output of one collection run for one indicator
///
/// Either fully computed for `window` or failed; never partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub run_id: Uuid,
    pub definition: String,
    pub indicator: Indicator,
    pub window: TimeRange,
    pub computed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: MetricOutcome,
}

impl MetricResult {
    pub fn success(
        definition: impl Into<String>,
        indicator: Indicator,
        window: TimeRange,
        computed_at: DateTime<Utc>,
        value: MetricValue,
        performance_level: PerformanceLevel,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            definition: definition.into(),
            indicator,
            window,
            computed_at,
            outcome: MetricOutcome::Success { value, performance_level },
        }
    }

    pub fn failure(
        definition: impl Into<String>,
        indicator: Indicator,
        window: TimeRange,
        computed_at: DateTime<Utc>,
        error: &CollectionError,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            definition: definition.into(),
            indicator,
            window,
            computed_at,
            outcome: MetricOutcome::Failure { error: error.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, MetricOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&MetricValue> {
        match &self.outcome {
            MetricOutcome::Success { value, .. } => Some(value),
            MetricOutcome::Failure { .. } => None,
        }
    }

    pub fn performance_level(&self) -> Option<PerformanceLevel> {
        match &self.outcome {
            MetricOutcome::Success { performance_level, .. } => Some(*performance_level),
            MetricOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&MetricError> {
        match &self.outcome {
            MetricOutcome::Success { .. } => None,
            MetricOutcome::Failure { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::errors::CalculationError;

    fn window() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn success_serializes_with_status_tag() {
        let value = MetricValue {
            value: 10.0,
            unit: Unit::Percent,
            sample_count: 10,
            summary: None,
            groups: Vec::new(),
            excluded: 0,
            trend: None,
            periods: Vec::new(),
            recent_failures: Vec::new(),
        };
        let result = MetricResult::success(
            "payments",
            Indicator::ChangeFailureRate,
            window(),
            window().end,
            value,
            PerformanceLevel::High,
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["indicator"], "change-failure-rate");
        assert_eq!(json["performance_level"], "High");
        assert_eq!(json["value"]["value"], 10.0);
        assert_eq!(result.performance_level(), Some(PerformanceLevel::High));
    }

    #[test]
    fn failure_records_category_and_message() {
        let err = CollectionError::from(CalculationError::insufficient("deployments", 5, 1));
        let result =
            MetricResult::failure("payments", Indicator::ChangeFailureRate, window(), window().end, &err);

        assert!(!result.is_success());
        assert!(result.value().is_none());
        let error = result.error().unwrap();
        assert_eq!(error.category, ErrorCategory::InsufficientData);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"]["category"], "insufficient_data");
    }
}
