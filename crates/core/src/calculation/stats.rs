//! Descriptive statistics over samples

use dora_domain::Summary;

/// Percentile `p` (0..=100) of an ascending slice, linearly interpolated
/// between the closest ranks
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let fraction = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, 50.0)
}

/// Population standard deviation
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Full summary, or `None` for no samples
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(Summary {
        count: sorted.len(),
        mean: mean(&sorted),
        median: percentile(&sorted, 50.0),
        p75: percentile(&sorted, 75.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        stddev: stddev(&sorted),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 50.0) - 2.5).abs() < 1e-9);
        assert!((percentile(&sorted, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&sorted, 100.0) - 4.0).abs() < 1e-9);
        assert!((percentile(&sorted, 90.0) - 3.7).abs() < 1e-9);
    }

    #[test]
    fn single_sample_is_every_percentile() {
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
        assert_eq!(median(&[7.0]), 7.0);
    }

    #[test]
    fn summary_covers_all_statistics() {
        let summary = summarize(&[4.0, 2.0, 6.0, 8.0]).unwrap();
        assert_eq!(summary.count, 4);
        assert!((summary.mean - 5.0).abs() < 1e-9);
        assert!((summary.median - 5.0).abs() < 1e-9);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 8.0);
        assert!((summary.stddev - 5.0_f64.sqrt()).abs() < 1e-9);
        assert!(summarize(&[]).is_none());
    }
}
