//! DORA indicators and performance levels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DoraError;
use crate::types::EventKind;

/// One of the four DORA delivery-performance indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Indicator {
    DeploymentFrequency,
    LeadTime,
    Mttr,
    ChangeFailureRate,
}

impl Indicator {
    pub const ALL: [Self; 4] =
        [Self::DeploymentFrequency, Self::LeadTime, Self::Mttr, Self::ChangeFailureRate];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeploymentFrequency => "deployment-frequency",
            Self::LeadTime => "lead-time",
            Self::Mttr => "mttr",
            Self::ChangeFailureRate => "change-failure-rate",
        }
    }

    /// Unit of the primary value
    pub fn unit(self) -> Unit {
        match self {
            Self::DeploymentFrequency => Unit::DeploymentsPerDay,
            Self::LeadTime => Unit::Hours,
            Self::Mttr => Unit::Minutes,
            Self::ChangeFailureRate => Unit::Percent,
        }
    }

    /// Event kinds the indicator cannot be computed without
    ///
    /// Change failure rate additionally consumes incidents when a source
    /// provides them.
    pub fn required_kinds(self) -> &'static [EventKind] {
        match self {
            Self::DeploymentFrequency | Self::ChangeFailureRate => &[EventKind::Deployment],
            Self::LeadTime => &[EventKind::Commit, EventKind::Deployment],
            Self::Mttr => &[EventKind::Incident],
        }
    }

    /// Event kinds the indicator reads when available
    pub fn consumed_kinds(self) -> &'static [EventKind] {
        match self {
            Self::ChangeFailureRate => &[EventKind::Deployment, EventKind::Incident],
            other => other.required_kinds(),
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Indicator {
    type Err = DoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|indicator| indicator.as_str() == s)
            .ok_or_else(|| DoraError::Validation(format!("unknown indicator '{s}'")))
    }
}

/// Unit of an indicator value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    DeploymentsPerDay,
    Hours,
    Minutes,
    Percent,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeploymentsPerDay => "deployments_per_day",
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Percent => "percent",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal DORA performance classification (Elite > High > Medium > Low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PerformanceLevel {
    Low,
    Medium,
    High,
    Elite,
}

impl PerformanceLevel {
    /// Numeric encoding used by metric exports (Low = 1 .. Elite = 4)
    pub fn score(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Elite => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Elite => "Elite",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
