//! Raw delivery events and the windows/filters used to fetch them

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::LABEL_SERVICE;
use crate::errors::DoraError;

/// Kind of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Commit,
    Deployment,
    Incident,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Deployment => "deployment",
            Self::Incident => "incident",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

/// A normalized unit of delivery data produced by a source adapter
///
/// `timestamp` is the commit time, deployment time, or incident creation
/// time depending on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Incident resolution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Id of the deployment this deployment rolls back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<String>,
}

impl RawEvent {
    pub fn new(kind: EventKind, id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp,
            outcome: Outcome::Unknown,
            labels: BTreeMap::new(),
            resolved_at: None,
            rollback_of: None,
        }
    }

    pub fn commit(sha: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventKind::Commit, sha, timestamp).with_outcome(Outcome::Success)
    }

    pub fn deployment(id: impl Into<String>, timestamp: DateTime<Utc>, outcome: Outcome) -> Self {
        Self::new(EventKind::Deployment, id, timestamp).with_outcome(outcome)
    }

    pub fn incident(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut event = Self::new(EventKind::Incident, id, created_at);
        event.resolved_at = resolved_at;
        event
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_rollback_of(mut self, deployment_id: impl Into<String>) -> Self {
        self.rollback_of = Some(deployment_id.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Service label, empty when absent
    pub fn service(&self) -> &str {
        self.label(LABEL_SERVICE).unwrap_or_default()
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }
}

/// A bounded, half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range; `start` must precede `end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DoraError> {
        if start >= end {
            return Err(DoraError::Validation(format!(
                "time range start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The window of length `length` ending at `end`
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        let length = chrono::Duration::from_std(length).unwrap_or(chrono::Duration::zero());
        let start = end.checked_sub_signed(length).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Length in fractional days
    pub fn days(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 86_400_000.0
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    /// Length of the intersection with `other`
    pub fn overlap(&self, other: &Self) -> chrono::Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            chrono::Duration::zero()
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Label constraints applied to fetched events
///
/// Every key must be present on the event with one of the allowed values.
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelFilter {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl LabelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `value` for `key` (values for the same key are OR-ed)
    #[must_use]
    pub fn allow(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.allowed.entry(key.into()).or_default().insert(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn matches(&self, event: &RawEvent) -> bool {
        self.allowed
            .iter()
            .all(|(key, values)| event.label(key).is_some_and(|v| values.contains(v)))
    }

    /// Allowed values for `key`, if constrained
    pub fn values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(key)
    }
}

impl From<&BTreeMap<String, String>> for LabelFilter {
    fn from(map: &BTreeMap<String, String>) -> Self {
        map.iter().fold(Self::new(), |filter, (k, v)| filter.allow(k.clone(), v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    #[test]
    fn time_range_rejects_inverted_bounds() {
        assert!(TimeRange::new(at(2, 0), at(1, 0)).is_err());
        assert!(TimeRange::new(at(1, 0), at(1, 0)).is_err());
    }

    #[test]
    fn time_range_is_half_open() {
        let range = TimeRange::new(at(1, 0), at(2, 0)).unwrap();
        assert!(range.contains(at(1, 0)));
        assert!(range.contains(at(1, 23)));
        assert!(!range.contains(at(2, 0)));
        assert!((range.days() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ending_at_computes_start() {
        let range = TimeRange::ending_at(at(31, 0), Duration::from_secs(30 * 86_400));
        assert_eq!(range.start, at(1, 0));
    }

    #[test]
    fn overlap_handles_disjoint_and_nested_ranges() {
        let day = TimeRange::new(at(1, 0), at(2, 0)).unwrap();
        let morning = TimeRange::new(at(1, 6), at(1, 12)).unwrap();
        let later = TimeRange::new(at(3, 0), at(4, 0)).unwrap();
        assert_eq!(day.overlap(&morning), chrono::Duration::hours(6));
        assert_eq!(day.overlap(&later), chrono::Duration::zero());
    }

    #[test]
    fn label_filter_requires_every_key() {
        let event = RawEvent::deployment("d1", at(1, 0), Outcome::Success)
            .with_label("service", "api")
            .with_label("environment", "production");

        assert!(LabelFilter::new().matches(&event));
        assert!(LabelFilter::new().allow("service", "api").matches(&event));
        assert!(LabelFilter::new()
            .allow("environment", "staging")
            .allow("environment", "production")
            .matches(&event));
        assert!(!LabelFilter::new().allow("team", "core").matches(&event));
        assert!(!LabelFilter::new().allow("service", "web").matches(&event));
    }

    #[test]
    fn raw_event_deserializes_with_defaults() {
        let event: RawEvent = serde_json::from_str(
            r#"{"kind":"incident","id":"P1","timestamp":"2024-01-01T10:00:00Z","resolved_at":"2024-01-01T10:45:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Incident);
        assert_eq!(event.outcome, Outcome::Unknown);
        assert_eq!(event.resolved_at, Some(at(1, 10) + chrono::Duration::minutes(45)));
    }
}
