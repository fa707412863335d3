//! Change failure rate: share of deployments that caused a failure, in
//! percent

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use dora_domain::constants::{LABEL_SERVICE, RECENT_FAILURES_LIMIT};
use dora_domain::{
    CalculationError, EventKind, FailedChange, FailureCause, MetricValue, Outcome, PeriodValue, RawEvent, TimeRange,
    Trend, Unit,
};

use super::{deployments_in_window, direction, grouped, ordered, trend_periods, CalculationOptions};

fn rate(failed: usize, total: usize) -> f64 {
    failed as f64 * 100.0 / total as f64
}

/// Whether `incident` may be attributed to `deployment`
///
/// The incident must be created within `correlation` after the deployment,
/// and the services must agree when both events carry one.
fn correlates(deployment: &RawEvent, incident: &RawEvent, correlation: chrono::Duration) -> bool {
    let same_service =
        deployment.service().is_empty() || incident.service().is_empty() || deployment.service() == incident.service();
    same_service
        && incident.timestamp >= deployment.timestamp
        && incident.timestamp <= deployment.timestamp + correlation
}

/// Ids of deployments charged with an incident
///
/// Each incident goes to the latest correlating deployment at or before it,
/// so one incident fails at most one change.
fn attribute_incidents<'a>(
    deployments: &[&'a RawEvent],
    incidents: &[&RawEvent],
    correlation: chrono::Duration,
) -> BTreeSet<&'a str> {
    incidents
        .iter()
        .filter_map(|incident| {
            deployments.iter().rev().copied().find(|d| correlates(d, incident, correlation)).map(|d| d.id.as_str())
        })
        .collect()
}

/// Monday 00:00 UTC of the week containing `at`
fn week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();
    let monday = date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()));
    Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN))
}

fn weekly(deployments: &[&RawEvent], causes: &[Option<FailureCause>]) -> Vec<PeriodValue> {
    let mut weeks: BTreeMap<DateTime<Utc>, (usize, usize)> = BTreeMap::new();
    for (deployment, cause) in deployments.iter().zip(causes) {
        let (total, failed) = weeks.entry(week_start(deployment.timestamp)).or_default();
        *total += 1;
        *failed += usize::from(cause.is_some());
    }
    weeks
        .into_iter()
        .map(|(start, (total, failed))| PeriodValue { start, value: rate(failed, total), sample_count: total, failed })
        .collect()
}

/// Failure rate of the last week against the period before it
fn trend(deployments: &[&RawEvent], causes: &[Option<FailureCause>], window: TimeRange) -> Trend {
    let Some((prior, recent)) = trend_periods(window) else {
        return Trend::InsufficientData;
    };
    let rate_in = |period: &TimeRange| {
        let (total, failed) = deployments
            .iter()
            .zip(causes)
            .filter(|(d, _)| period.contains(d.timestamp))
            .fold((0, 0), |(total, failed), (_, cause)| (total + 1, failed + usize::from(cause.is_some())));
        (total > 0).then(|| rate(failed, total))
    };
    match (rate_in(&recent), rate_in(&prior)) {
        (Some(recent), Some(prior)) => direction(recent, prior),
        _ => Trend::InsufficientData,
    }
}

pub fn calculate(events: &[RawEvent], options: &CalculationOptions) -> Result<MetricValue, CalculationError> {
    let (rollbacks, deployments): (Vec<&RawEvent>, Vec<&RawEvent>) =
        deployments_in_window(events, options).into_iter().partition(|d| d.is_rollback());

    if deployments.len() < options.min_deployments {
        return Err(CalculationError::insufficient(
            "deployments",
            options.min_deployments,
            deployments.len(),
        ));
    }

    // Rollbacks outside the window still mark their target as failed
    let rolled_back: BTreeSet<&str> = ordered(events, EventKind::Deployment)
        .into_iter()
        .filter_map(|d| d.rollback_of.as_deref())
        .collect();
    let charged = match options.incident_correlation_window.and_then(|w| chrono::Duration::from_std(w).ok()) {
        Some(correlation) => attribute_incidents(&deployments, &ordered(events, EventKind::Incident), correlation),
        None => BTreeSet::new(),
    };

    let causes: Vec<Option<FailureCause>> = deployments
        .iter()
        .map(|d| {
            if d.outcome == Outcome::Failure {
                Some(FailureCause::Outcome)
            } else if rolled_back.contains(d.id.as_str()) {
                Some(FailureCause::RolledBack)
            } else if charged.contains(d.id.as_str()) {
                Some(FailureCause::Incident)
            } else {
                None
            }
        })
        .collect();
    let failures = causes.iter().filter(|c| c.is_some()).count();

    let recent_failures = deployments
        .iter()
        .zip(&causes)
        .filter_map(|(d, cause)| {
            cause.map(|cause| FailedChange {
                id: d.id.clone(),
                timestamp: d.timestamp,
                service: d.label(LABEL_SERVICE).map(str::to_string),
                cause,
            })
        })
        .rev()
        .take(RECENT_FAILURES_LIMIT)
        .collect();

    Ok(MetricValue {
        value: rate(failures, deployments.len()),
        unit: Unit::Percent,
        sample_count: deployments.len(),
        summary: None,
        groups: grouped(
            deployments.iter().zip(&causes).map(|(d, c)| (*d, if c.is_some() { 1.0 } else { 0.0 })),
            |samples| rate(samples.iter().filter(|s| **s > 0.0).count(), samples.len()),
        ),
        excluded: rollbacks.len(),
        trend: Some(trend(&deployments, &causes, options.window)),
        periods: weekly(&deployments, &causes),
        recent_failures,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dora_domain::{ErrorCategory, Indicator, PerformanceLevel};

    use super::super::evaluate;
    use super::super::fixtures::{at, january};
    use super::*;

    fn production(id: &str, day: u32, outcome: Outcome) -> RawEvent {
        RawEvent::deployment(id, at(day, 12, 0), outcome)
            .with_label("environment", "production")
            .with_label("service", "payments")
    }

    fn ten_deployments() -> Vec<RawEvent> {
        (1..=10).map(|n| production(&format!("#{n}"), n, Outcome::Success)).collect()
    }

    #[test]
    fn rollback_of_one_in_ten_is_high() {
        let mut events = ten_deployments();
        events.push(production("rb", 8, Outcome::Success).with_rollback_of("#7"));
        let mut options = CalculationOptions::new(january());
        options.environments = vec!["production".into()];

        let (value, level) = evaluate(Indicator::ChangeFailureRate, &events, &options).unwrap();

        assert_eq!(value.value, 10.0);
        assert_eq!(value.sample_count, 10);
        assert_eq!(value.excluded, 1);
        assert_eq!(level, PerformanceLevel::High);
    }

    #[test]
    fn below_minimum_is_insufficient_never_zero() {
        let events: Vec<RawEvent> = (1..=3).map(|n| production(&format!("#{n}"), n, Outcome::Success)).collect();

        let err = calculate(&events, &CalculationOptions::new(january())).unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InsufficientData);
        assert_eq!(err.to_string(), "insufficient data: 3 deployments in window, at least 5 required");
    }

    #[test]
    fn failure_outcome_and_rollback_of_same_deployment_count_once() {
        let mut events = ten_deployments();
        events[2].outcome = Outcome::Failure;
        events.push(production("rb", 4, Outcome::Success).with_rollback_of("#3"));

        let value = calculate(&events, &CalculationOptions::new(january())).unwrap();
        assert_eq!(value.value, 10.0);
    }

    #[test]
    fn incidents_correlate_within_window_and_service() {
        let mut events = ten_deployments();
        // 2h after #4, same service
        events.push(RawEvent::incident("P1", at(4, 14, 0), None).with_label("service", "payments"));
        // 1h after #5 but another service
        events.push(RawEvent::incident("P2", at(5, 13, 0), None).with_label("service", "search"));
        // 22h after #9, outside the correlation window
        events.push(RawEvent::incident("P3", at(10, 10, 0), None).with_label("service", "payments"));

        let mut options = CalculationOptions::new(january());
        options.incident_correlation_window = Some(Duration::from_secs(4 * 3600));

        let value = calculate(&events, &options).unwrap();
        assert_eq!(value.value, 10.0);

        options.incident_correlation_window = None;
        let value = calculate(&events, &options).unwrap();
        assert_eq!(value.value, 0.0);
    }

    #[test]
    fn one_incident_fails_only_the_latest_preceding_deployment() {
        let mut events: Vec<RawEvent> = (0..5)
            .map(|n| {
                RawEvent::deployment(format!("d{n}"), at(3, 9, n * 10), Outcome::Success).with_label("service", "payments")
            })
            .collect();
        events.push(RawEvent::incident("P1", at(3, 10, 0), None).with_label("service", "payments"));

        let mut options = CalculationOptions::new(january());
        options.incident_correlation_window = Some(Duration::from_secs(4 * 3600));

        let value = calculate(&events, &options).unwrap();
        assert_eq!(value.value, 20.0);
        assert_eq!(value.recent_failures.len(), 1);
        assert_eq!(value.recent_failures[0].id, "d4");
        assert_eq!(value.recent_failures[0].cause, FailureCause::Incident);
    }

    #[test]
    fn weekly_periods_trend_and_recent_failures() {
        let mut events = ten_deployments();
        events[1].outcome = Outcome::Failure;
        events[8].outcome = Outcome::Failure;
        let two_weeks = TimeRange::new(at(1, 0, 0), at(15, 0, 0)).unwrap();

        let value = calculate(&events, &CalculationOptions::new(two_weeks)).unwrap();

        // 2024-01-01 is a Monday
        assert_eq!(value.periods.len(), 2);
        assert_eq!(value.periods[0].start, at(1, 0, 0));
        assert_eq!((value.periods[0].sample_count, value.periods[0].failed), (7, 1));
        assert_eq!(value.periods[1].start, at(8, 0, 0));
        assert_eq!((value.periods[1].sample_count, value.periods[1].failed), (3, 1));

        assert_eq!(value.trend, Some(Trend::Increasing));

        let ids: Vec<&str> = value.recent_failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["#9", "#2"]);
        assert_eq!(value.recent_failures[0].service.as_deref(), Some("payments"));
    }

    #[test]
    fn groups_report_rate_per_service() {
        let mut events = ten_deployments();
        events[0].outcome = Outcome::Failure;
        events.extend((11..=14).map(|n| {
            RawEvent::deployment(format!("w{n}"), at(n, 12, 0), Outcome::Success).with_label("service", "web")
        }));

        let value = calculate(&events, &CalculationOptions::new(january())).unwrap();

        let payments = value.groups.iter().find(|g| g.labels["service"] == "payments").unwrap();
        let web = value.groups.iter().find(|g| g.labels["service"] == "web").unwrap();
        assert_eq!(payments.value, 10.0);
        assert_eq!(web.value, 0.0);
    }
}
