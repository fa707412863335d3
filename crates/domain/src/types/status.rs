//! Status records and the status sub-object surfaced on definitions

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCategory;
use crate::types::{Indicator, MetricError, MetricOutcome, MetricResult, PerformanceLevel, Summary, Unit};

/// Derived health of an indicator's collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// No run has succeeded yet and none has failed
    NoSuccessYet,
    /// The last run succeeded recently
    Healthy,
    /// The last run succeeded but longer ago than the staleness bound
    Stale,
    /// The most recent run fetched its data but the indicator is undefined
    /// for it (too few deployments, no resolved incidents)
    InsufficientData,
    /// The most recent run failed
    Failing,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSuccessYet => "no_success_yet",
            Self::Healthy => "healthy",
            Self::Stale => "stale",
            Self::InsufficientData => "insufficient_data",
            Self::Failing => "failing",
        }
    }
}

/// Latest result and collection history for one (definition, indicator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub definition: String,
    pub indicator: Indicator,
    /// Incremented on every applied update
    pub version: u64,
    pub last_success: Option<MetricResult>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_window_end: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Latest run that ended in a policy exclusion rather than a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_excluded_at: Option<DateTime<Utc>>,
    pub last_error: Option<MetricError>,
    pub consecutive_failures: u32,
}

impl StatusRecord {
    pub fn new(definition: impl Into<String>, indicator: Indicator) -> Self {
        Self {
            definition: definition.into(),
            indicator,
            version: 0,
            last_success: None,
            last_attempt_at: None,
            last_window_end: None,
            last_success_at: None,
            last_failure_at: None,
            last_excluded_at: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    /// Apply a completed run
    ///
    /// Results whose window does not end strictly after the last applied
    /// window are discarded; returns whether the record changed. A failure
    /// never replaces the last successful value. Exclusions such as
    /// insufficient data are kept as the last error but do not count as
    /// failures.
    pub fn apply(&mut self, result: &MetricResult) -> bool {
        if self.last_window_end.is_some_and(|end| result.window.end <= end) {
            return false;
        }

        match &result.outcome {
            MetricOutcome::Success { .. } => {
                self.last_success = Some(result.clone());
                self.last_success_at = Some(result.computed_at);
                self.consecutive_failures = 0;
            }
            MetricOutcome::Failure { error } if error.category.is_exclusion() => {
                self.last_excluded_at = Some(result.computed_at);
                self.last_error = Some(error.clone());
                self.consecutive_failures = 0;
            }
            MetricOutcome::Failure { error } => {
                self.last_failure_at = Some(result.computed_at);
                self.last_error = Some(error.clone());
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
        }
        self.last_attempt_at = Some(result.computed_at);
        self.last_window_end = Some(result.window.end);
        self.version += 1;
        true
    }

    /// Health at `now`; successes older than `stale_after` are stale
    pub fn health(&self, now: DateTime<Utc>, stale_after: Duration) -> Health {
        if self.consecutive_failures > 0 {
            return Health::Failing;
        }
        if self.last_excluded_at.is_some_and(|at| !self.last_success_at.is_some_and(|success| success >= at)) {
            return Health::InsufficientData;
        }
        match self.last_success_at {
            None => Health::NoSuccessYet,
            Some(at) => {
                let age = (now - at).to_std().unwrap_or(Duration::ZERO);
                if age > stale_after {
                    Health::Stale
                } else {
                    Health::Healthy
                }
            }
        }
    }
}

/// Per-indicator status surfaced on a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStatus {
    pub indicator: Indicator,
    pub health: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_level: Option<PerformanceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due: Option<DateTime<Utc>>,
}

impl IndicatorStatus {
    /// Status for an indicator that has no record yet
    pub fn pending(indicator: Indicator, next_due: Option<DateTime<Utc>>) -> Self {
        Self {
            indicator,
            health: Health::NoSuccessYet,
            value: None,
            unit: None,
            summary: None,
            performance_level: None,
            last_success_at: None,
            last_failure_at: None,
            last_error_category: None,
            last_error: None,
            consecutive_failures: 0,
            next_due,
        }
    }

    pub fn from_record(record: &StatusRecord, health: Health, next_due: Option<DateTime<Utc>>) -> Self {
        let value = record.last_success.as_ref().and_then(MetricResult::value);
        Self {
            indicator: record.indicator,
            health,
            value: value.map(|v| v.value),
            unit: value.map(|v| v.unit),
            summary: value.and_then(|v| v.summary),
            performance_level: record.last_success.as_ref().and_then(MetricResult::performance_level),
            last_success_at: record.last_success_at,
            last_failure_at: record.last_failure_at,
            last_error_category: record.last_error.as_ref().map(|e| e.category),
            last_error: record.last_error.as_ref().map(|e| e.message.clone()),
            consecutive_failures: record.consecutive_failures,
            next_due,
        }
    }
}

/// Read-only status sub-object written back to a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionStatus {
    pub observed_at: DateTime<Utc>,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(default)]
    pub indicators: Vec<IndicatorStatus>,
}

impl DefinitionStatus {
    pub fn invalid(observed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self { observed_at, valid: false, validation_error: Some(error.into()), indicators: Vec::new() }
    }

    /// Same content, ignoring the observation time
    pub fn same_content(&self, other: &Self) -> bool {
        self.valid == other.valid
            && self.validation_error == other.validation_error
            && self.indicators == other.indicators
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::errors::{AdapterError, CalculationError, CollectionError};
    use crate::types::{MetricValue, TimeRange};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn success(end: u32, value: f64) -> MetricResult {
        MetricResult::success(
            "payments",
            Indicator::Mttr,
            TimeRange::new(day(1), day(end)).unwrap(),
            day(end),
            MetricValue {
                value,
                unit: Unit::Minutes,
                sample_count: 1,
                summary: None,
                groups: Vec::new(),
                excluded: 0,
                trend: None,
                periods: Vec::new(),
                recent_failures: Vec::new(),
            },
            PerformanceLevel::Elite,
        )
    }

    fn failure(end: u32) -> MetricResult {
        MetricResult::failure(
            "payments",
            Indicator::Mttr,
            TimeRange::new(day(1), day(end)).unwrap(),
            day(end),
            &CollectionError::adapter("pagerduty", AdapterError::transient("reset")),
        )
    }

    #[test]
    fn later_window_applies_and_earlier_is_discarded() {
        let mut record = StatusRecord::new("payments", Indicator::Mttr);
        assert!(record.apply(&success(10, 45.0)));
        assert!(record.apply(&success(12, 30.0)));
        assert!(!record.apply(&success(11, 99.0)));
        assert!(!record.apply(&success(12, 99.0)));

        assert_eq!(record.version, 2);
        assert_eq!(record.last_success.as_ref().and_then(|r| r.value()).map(|v| v.value), Some(30.0));
    }

    #[test]
    fn failure_keeps_last_success_value() {
        let mut record = StatusRecord::new("payments", Indicator::Mttr);
        record.apply(&success(10, 45.0));
        record.apply(&failure(11));
        record.apply(&failure(12));

        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.last_success.as_ref().and_then(|r| r.value()).map(|v| v.value), Some(45.0));
        assert_eq!(record.last_error.as_ref().map(|e| e.category), Some(ErrorCategory::TransientNetwork));

        record.apply(&success(13, 50.0));
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn health_distinguishes_pending_stale_and_failing() {
        let stale_after = Duration::from_secs(2 * 86_400);
        let mut record = StatusRecord::new("payments", Indicator::Mttr);
        assert_eq!(record.health(day(10), stale_after), Health::NoSuccessYet);

        record.apply(&success(10, 45.0));
        assert_eq!(record.health(day(11), stale_after), Health::Healthy);
        assert_eq!(record.health(day(15), stale_after), Health::Stale);

        record.apply(&failure(16));
        assert_eq!(record.health(day(16), stale_after), Health::Failing);
    }

    #[test]
    fn insufficient_data_is_recorded_without_failing() {
        let stale_after = Duration::from_secs(2 * 86_400);
        let too_few = CollectionError::from(CalculationError::insufficient("deployments", 5, 2));
        let excluded = |end: u32| {
            MetricResult::failure(
                "payments",
                Indicator::Mttr,
                TimeRange::new(day(1), day(end)).unwrap(),
                day(end),
                &too_few,
            )
        };

        let mut record = StatusRecord::new("payments", Indicator::Mttr);
        assert!(record.apply(&excluded(9)));
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_failure_at.is_none());
        assert_eq!(record.last_error.as_ref().map(|e| e.category), Some(ErrorCategory::InsufficientData));
        assert_eq!(record.health(day(9), stale_after), Health::InsufficientData);

        record.apply(&success(10, 45.0));
        assert_eq!(record.health(day(10), stale_after), Health::Healthy);

        record.apply(&failure(11));
        record.apply(&excluded(12));
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.health(day(12), stale_after), Health::InsufficientData);
        assert_eq!(record.last_success.as_ref().and_then(|r| r.value()).map(|v| v.value), Some(45.0));
    }

    #[test]
    fn indicator_status_projects_record() {
        let mut record = StatusRecord::new("payments", Indicator::Mttr);
        record.apply(&success(10, 45.0));
        record.apply(&failure(11));

        let status = IndicatorStatus::from_record(&record, Health::Failing, Some(day(12)));
        assert_eq!(status.value, Some(45.0));
        assert_eq!(status.performance_level, Some(PerformanceLevel::Elite));
        assert_eq!(status.last_error_category, Some(ErrorCategory::TransientNetwork));
        assert_eq!(status.consecutive_failures, 1);
    }
}
