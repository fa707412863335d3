//! Indicator calculators
//!
//! Every calculator is a pure function of events, window and options.
//! Events are ordered by `(timestamp, id)` before processing so that
//! identical input always yields an identical value.

pub mod change_failure_rate;
pub mod classification;
pub mod deployment_frequency;
pub mod lead_time;
pub mod recovery;
pub mod stats;

use std::collections::BTreeMap;
use std::time::Duration;

use dora_domain::constants::{
    LABEL_ENVIRONMENT, LABEL_SERVICE, LABEL_TEAM, TREND_PERIOD_DAYS, TREND_STABLE_TOLERANCE,
};
use dora_domain::{
    CalculationError, EventKind, GroupValue, Indicator, IndicatorSpec, MetricValue, PerformanceLevel,
    RawEvent, TimeRange, Trend,
};

pub use classification::classify;

/// Per-run calculation inputs taken from the `IndicatorSpec`
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationOptions {
    pub window: TimeRange,
    /// Deployment environments to include; empty means all
    pub environments: Vec<String>,
    pub min_deployments: usize,
    pub incident_correlation_window: Option<Duration>,
    pub excluded_windows: Vec<TimeRange>,
}

impl CalculationOptions {
    pub fn new(window: TimeRange) -> Self {
        Self {
            window,
            environments: Vec::new(),
            min_deployments: dora_domain::constants::DEFAULT_MIN_DEPLOYMENTS,
            incident_correlation_window: None,
            excluded_windows: Vec::new(),
        }
    }

    pub fn from_spec(spec: &IndicatorSpec, window: TimeRange) -> Self {
        Self {
            window,
            environments: spec.environments.clone(),
            min_deployments: spec.min_deployments,
            incident_correlation_window: spec.incident_correlation_window,
            excluded_windows: spec.excluded_windows.clone(),
        }
    }

    fn includes_environment(&self, event: &RawEvent) -> bool {
        self.environments.is_empty()
            || event
                .label(LABEL_ENVIRONMENT)
                .is_some_and(|env| self.environments.iter().any(|allowed| allowed == env))
    }
}

/// Compute the indicator value
pub fn calculate(
    indicator: Indicator,
    events: &[RawEvent],
    options: &CalculationOptions,
) -> Result<MetricValue, CalculationError> {
    match indicator {
        Indicator::DeploymentFrequency => Ok(deployment_frequency::calculate(events, options)),
        Indicator::LeadTime => lead_time::calculate(events, options),
        Indicator::Mttr => recovery::calculate(events, options),
        Indicator::ChangeFailureRate => change_failure_rate::calculate(events, options),
    }
}

/// Compute and classify the indicator value
pub fn evaluate(
    indicator: Indicator,
    events: &[RawEvent],
    options: &CalculationOptions,
) -> Result<(MetricValue, PerformanceLevel), CalculationError> {
    let value = calculate(indicator, events, options)?;
    let level = classify(indicator, value.value);
    Ok((value, level))
}

/// Events of `kind`, ordered by `(timestamp, id)`
fn ordered(events: &[RawEvent], kind: EventKind) -> Vec<&RawEvent> {
    let mut selected: Vec<&RawEvent> = events.iter().filter(|e| e.kind == kind).collect();
    selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    selected
}

/// Deployments inside the window and the configured environments, ordered
fn deployments_in_window<'a>(events: &'a [RawEvent], options: &CalculationOptions) -> Vec<&'a RawEvent> {
    ordered(events, EventKind::Deployment)
        .into_iter()
        .filter(|d| options.window.contains(d.timestamp) && options.includes_environment(d))
        .collect()
}

/// Grouping labels of an event: service and team when present
fn group_labels(event: &RawEvent) -> BTreeMap<String, String> {
    [LABEL_SERVICE, LABEL_TEAM]
        .into_iter()
        .filter_map(|key| event.label(key).map(|v| (key.to_string(), v.to_string())))
        .collect()
}

/// Bucket per-event samples by group labels and reduce each bucket
///
/// Events without any grouping label are left out of the groups but still
/// count toward the overall value.
fn grouped<'a, I, F>(samples: I, reduce: F) -> Vec<GroupValue>
where
    I: IntoIterator<Item = (&'a RawEvent, f64)>,
    F: Fn(&[f64]) -> f64,
{
    let mut buckets: BTreeMap<BTreeMap<String, String>, Vec<f64>> = BTreeMap::new();
    for (event, sample) in samples {
        let labels = group_labels(event);
        if !labels.is_empty() {
            buckets.entry(labels).or_default().push(sample);
        }
    }
    buckets
        .into_iter()
        .map(|(labels, values)| GroupValue { value: reduce(&values), sample_count: values.len(), labels })
        .collect()
}

/// The comparison period and the last week of `window`, in that order
///
/// When the window is shorter than two weeks the remainder before the last
/// week is the comparison period. `None` when the window is a week or less.
fn trend_periods(window: TimeRange) -> Option<(TimeRange, TimeRange)> {
    let period = chrono::Duration::days(TREND_PERIOD_DAYS);
    let length = window.duration();
    if length <= period {
        return None;
    }
    let recent_start = window.end - period;
    let prior_start = recent_start - (length - period).min(period);
    Some((
        TimeRange { start: prior_start, end: recent_start },
        TimeRange { start: recent_start, end: window.end },
    ))
}

/// Direction of `recent` against `prior` with a relative stable band
fn direction(recent: f64, prior: f64) -> Trend {
    if prior == 0.0 {
        return if recent > 0.0 { Trend::Increasing } else { Trend::Stable };
    }
    let change = (recent - prior) / prior;
    if change > TREND_STABLE_TOLERANCE {
        Trend::Increasing
    } else if change < -TREND_STABLE_TOLERANCE {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}


#[cfg(test)]
mod tests {
    use dora_domain::Outcome;

    use super::fixtures::{at, january};
    use super::*;

    #[test]
    fn evaluate_is_deterministic_regardless_of_input_order() {
        let mut events: Vec<RawEvent> = (1..=9)
            .map(|d| RawEvent::deployment(format!("d{d}"), at(d, 12, 0), Outcome::Success))
            .collect();
        events.extend((1..=9).map(|d| RawEvent::commit(format!("c{d}"), at(d, 9, 0))));
        let options = CalculationOptions::new(january());

        let forward = evaluate(Indicator::LeadTime, &events, &options).unwrap();
        events.reverse();
        let backward = evaluate(Indicator::LeadTime, &events, &options).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.0.value.to_bits(), backward.0.value.to_bits());
    }

    #[test]
    fn environment_filter_restricts_deployments() {
        let events = vec![
            RawEvent::deployment("d1", at(2, 0, 0), Outcome::Success).with_label("environment", "production"),
            RawEvent::deployment("d2", at(3, 0, 0), Outcome::Success).with_label("environment", "staging"),
            RawEvent::deployment("d3", at(4, 0, 0), Outcome::Success),
        ];
        let mut options = CalculationOptions::new(january());
        options.environments = vec!["production".into()];

        let selected = deployments_in_window(&events, &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "d1");
    }

    #[test]
    fn groups_skip_unlabelled_events() {
        let a = RawEvent::deployment("a", at(2, 0, 0), Outcome::Success).with_label("service", "api");
        let b = RawEvent::deployment("b", at(3, 0, 0), Outcome::Success).with_label("service", "api");
        let c = RawEvent::deployment("c", at(4, 0, 0), Outcome::Success);

        let groups = grouped([(&a, 1.0), (&b, 3.0), (&c, 10.0)], stats::mean);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].labels.get("service").map(String::as_str), Some("api"));
        assert_eq!(groups[0].value, 2.0);
        assert_eq!(groups[0].sample_count, 2);
    }
}
