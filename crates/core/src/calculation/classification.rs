//! Performance level lookup
//!
//! Boundaries belong to the better level.

use dora_domain::constants::thresholds::{
    CHANGE_FAILURE_RATE_ELITE, CHANGE_FAILURE_RATE_HIGH, CHANGE_FAILURE_RATE_MEDIUM,
    DEPLOYMENT_FREQUENCY_ELITE, DEPLOYMENT_FREQUENCY_HIGH, DEPLOYMENT_FREQUENCY_MEDIUM,
    LEAD_TIME_ELITE_HOURS, LEAD_TIME_HIGH_HOURS, LEAD_TIME_MEDIUM_HOURS, MTTR_ELITE_MINUTES,
    MTTR_HIGH_MINUTES, MTTR_MEDIUM_MINUTES,
};
use dora_domain::{Indicator, PerformanceLevel};

/// Classify a primary indicator value
pub fn classify(indicator: Indicator, value: f64) -> PerformanceLevel {
    match indicator {
        Indicator::DeploymentFrequency => at_least(
            value,
            DEPLOYMENT_FREQUENCY_ELITE,
            DEPLOYMENT_FREQUENCY_HIGH,
            DEPLOYMENT_FREQUENCY_MEDIUM,
        ),
        Indicator::LeadTime => {
            at_most(value, LEAD_TIME_ELITE_HOURS, LEAD_TIME_HIGH_HOURS, LEAD_TIME_MEDIUM_HOURS)
        }
        Indicator::Mttr => at_most(value, MTTR_ELITE_MINUTES, MTTR_HIGH_MINUTES, MTTR_MEDIUM_MINUTES),
        Indicator::ChangeFailureRate => at_most(
            value,
            CHANGE_FAILURE_RATE_ELITE,
            CHANGE_FAILURE_RATE_HIGH,
            CHANGE_FAILURE_RATE_MEDIUM,
        ),
    }
}

fn at_least(value: f64, elite: f64, high: f64, medium: f64) -> PerformanceLevel {
    if value >= elite {
        PerformanceLevel::Elite
    } else if value >= high {
        PerformanceLevel::High
    } else if value >= medium {
        PerformanceLevel::Medium
    } else {
        PerformanceLevel::Low
    }
}

fn at_most(value: f64, elite: f64, high: f64, medium: f64) -> PerformanceLevel {
    if value <= elite {
        PerformanceLevel::Elite
    } else if value <= high {
        PerformanceLevel::High
    } else if value <= medium {
        PerformanceLevel::Medium
    } else {
        PerformanceLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_frequency_boundaries() {
        assert_eq!(classify(Indicator::DeploymentFrequency, 3.0), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::DeploymentFrequency, 1.0), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::DeploymentFrequency, 1.0 / 7.0), PerformanceLevel::High);
        assert_eq!(classify(Indicator::DeploymentFrequency, 0.1), PerformanceLevel::Medium);
        assert_eq!(classify(Indicator::DeploymentFrequency, 0.0), PerformanceLevel::Low);
    }

    #[test]
    fn lower_is_better_indicators() {
        assert_eq!(classify(Indicator::LeadTime, 0.5), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::LeadTime, 168.0), PerformanceLevel::High);
        assert_eq!(classify(Indicator::LeadTime, 1_000.0), PerformanceLevel::Low);

        assert_eq!(classify(Indicator::Mttr, 45.0), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::Mttr, 60.0), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::Mttr, 61.0), PerformanceLevel::High);
        assert_eq!(classify(Indicator::Mttr, 10_080.0), PerformanceLevel::Medium);

        assert_eq!(classify(Indicator::ChangeFailureRate, 10.0), PerformanceLevel::High);
        assert_eq!(classify(Indicator::ChangeFailureRate, 5.0), PerformanceLevel::Elite);
        assert_eq!(classify(Indicator::ChangeFailureRate, 30.0), PerformanceLevel::Medium);
        assert_eq!(classify(Indicator::ChangeFailureRate, 45.0), PerformanceLevel::Low);
    }
}
