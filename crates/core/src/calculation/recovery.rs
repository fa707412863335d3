//! Mean time to recovery, in minutes

use dora_domain::{CalculationError, EventKind, MetricValue, RawEvent, TimeRange, Unit};
use tracing::debug;

use super::{grouped, ordered, stats, CalculationOptions};

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Sort and merge overlapping or touching ranges
pub fn merge_windows(windows: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted = windows.to_vec();
    sorted.sort_by_key(|w| (w.start, w.end));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for window in sorted {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => last.end = last.end.max(window.end),
            _ => merged.push(window),
        }
    }
    merged
}

/// Recovery time of a resolved incident minus excluded time
///
/// `excluded` must already be merged. `None` for unresolved incidents or a
/// resolution before creation.
pub fn recovery_minutes(incident: &RawEvent, excluded: &[TimeRange]) -> Option<f64> {
    let resolved_at = incident.resolved_at?;
    if resolved_at < incident.timestamp {
        return None;
    }
    let outage = TimeRange { start: incident.timestamp, end: resolved_at };
    let excluded_time = excluded
        .iter()
        .map(|w| outage.overlap(w))
        .fold(chrono::Duration::zero(), |acc, d| acc + d);
    let effective = (outage.duration() - excluded_time).max(chrono::Duration::zero());
    Some(effective.num_milliseconds() as f64 / MILLIS_PER_MINUTE)
}

pub fn calculate(events: &[RawEvent], options: &CalculationOptions) -> Result<MetricValue, CalculationError> {
    let excluded_windows = merge_windows(&options.excluded_windows);
    let incidents: Vec<&RawEvent> = ordered(events, EventKind::Incident)
        .into_iter()
        .filter(|i| options.window.contains(i.timestamp))
        .collect();

    let mut samples = Vec::with_capacity(incidents.len());
    for incident in &incidents {
        match recovery_minutes(incident, &excluded_windows) {
            Some(minutes) => samples.push((*incident, minutes)),
            None => debug!(incident = %incident.id, "unresolved incident excluded from recovery time"),
        }
    }

    let minutes: Vec<f64> = samples.iter().map(|(_, m)| *m).collect();
    let Some(summary) = stats::summarize(&minutes) else {
        return Err(CalculationError::insufficient("resolved incidents", 1, 0));
    };

    Ok(MetricValue {
        value: summary.mean,
        unit: Unit::Minutes,
        sample_count: samples.len(),
        summary: Some(summary),
        groups: grouped(samples.iter().copied(), stats::mean),
        excluded: incidents.len() - samples.len(),
        trend: None,
        periods: Vec::new(),
        recent_failures: Vec::new(),
    })
}
