//! Deployment frequency: successful deployments per day

use dora_domain::{MetricValue, Outcome, RawEvent, TimeRange, Trend, Unit};

use super::{deployments_in_window, direction, grouped, trend_periods, CalculationOptions};

pub fn calculate(events: &[RawEvent], options: &CalculationOptions) -> MetricValue {
    let in_window = deployments_in_window(events, options);
    let total = in_window.len();
    let successful: Vec<&RawEvent> =
        in_window.into_iter().filter(|d| d.outcome == Outcome::Success).collect();

    let days = options.window.days();
    let per_day = |count: usize| count as f64 / days;

    MetricValue {
        value: per_day(successful.len()),
        unit: Unit::DeploymentsPerDay,
        sample_count: successful.len(),
        summary: None,
        groups: grouped(successful.iter().map(|d| (*d, 1.0)), |samples| per_day(samples.len())),
        excluded: total - successful.len(),
        trend: Some(trend(&successful, options.window)),
        periods: Vec::new(),
        recent_failures: Vec::new(),
    }
}

/// Daily rate of the last week against the period before it
pub fn trend(deployments: &[&RawEvent], window: TimeRange) -> Trend {
    let Some((prior, recent)) = trend_periods(window) else {
        return Trend::InsufficientData;
    };
    let per_day =
        |period: &TimeRange| deployments.iter().filter(|d| period.contains(d.timestamp)).count() as f64 / period.days();
    direction(per_day(&recent), per_day(&prior))
}
