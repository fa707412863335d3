//! Domain constants
//!
//! Published DORA thresholds, well-known label names and definition defaults.

use std::time::Duration;

// Well-known event labels
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_TEAM: &str = "team";
pub const LABEL_ENVIRONMENT: &str = "environment";
pub const LABEL_SEVERITY: &str = "severity";
pub const LABEL_SOURCE: &str = "source";
pub const LABEL_REPOSITORY: &str = "repository";

// Definition defaults
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30 * 86_400);
pub const DEFAULT_MIN_DEPLOYMENTS: usize = 5;

// Trends: last 7 days against the 7 before
pub const TREND_PERIOD_DAYS: i64 = 7;
/// Relative change below which the trend is reported as stable
pub const TREND_STABLE_TOLERANCE: f64 = 0.10;

/// Failed changes listed on a change-failure-rate value, newest first
pub const RECENT_FAILURES_LIMIT: usize = 5;

/// Performance thresholds. Boundaries belong to the better level.
pub mod thresholds {
    /// Deployments per day
    pub const DEPLOYMENT_FREQUENCY_ELITE: f64 = 1.0;
    pub const DEPLOYMENT_FREQUENCY_HIGH: f64 = 1.0 / 7.0;
    pub const DEPLOYMENT_FREQUENCY_MEDIUM: f64 = 1.0 / 30.0;

    /// Median lead time, hours
    pub const LEAD_TIME_ELITE_HOURS: f64 = 1.0;
    pub const LEAD_TIME_HIGH_HOURS: f64 = 168.0;
    pub const LEAD_TIME_MEDIUM_HOURS: f64 = 720.0;

    /// Mean time to recovery, minutes
    pub const MTTR_ELITE_MINUTES: f64 = 60.0;
    pub const MTTR_HIGH_MINUTES: f64 = 1_440.0;
    pub const MTTR_MEDIUM_MINUTES: f64 = 10_080.0;

    /// Change failure rate, percent
    pub const CHANGE_FAILURE_RATE_ELITE: f64 = 5.0;
    pub const CHANGE_FAILURE_RATE_HIGH: f64 = 15.0;
    pub const CHANGE_FAILURE_RATE_MEDIUM: f64 = 30.0;
}
