//! Recurring schedule expressions.
//!
//! A schedule is evaluated as a pure function `(expression, last fired) ->
//! next due`. Accepted forms:
//!
//! | Expression | Meaning |
//! |------------|---------|
//! | `15m`, `1h 30m` | fixed interval after the last fire |
//! | `@every 15m` | same as above |
//! | `@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly` | cron macros |
//! | `*/15 * * * *` | five-field cron |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::cron::{CronExpression, CronParseError};
use super::duration::{format_duration, parse_duration, DurationParseError};

/// Error returned when a schedule expression cannot be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("Empty schedule expression")]
    Empty,

    #[error("Invalid interval '{expression}': {source}")]
    Interval {
        expression: String,
        #[source]
        source: DurationParseError,
    },

    #[error("Interval must be at least one second: '{0}'")]
    IntervalTooShort(String),

    #[error("Unknown schedule macro: {0}")]
    UnknownMacro(String),

    #[error("Invalid cron expression '{expression}': {source}")]
    Cron {
        expression: String,
        #[source]
        source: CronParseError,
    },
}

/// A parsed recurring schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fire every `Duration` after the previous fire
    Every(Duration),
    /// Fire on cron matches; `source` keeps the original text (macro or
    /// fields)
    Cron { expression: CronExpression, source: String },
}

impl Schedule {
    /// Parse a schedule expression
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ScheduleParseError::Empty);
        }

        if let Some(interval) = expr.strip_prefix("@every") {
            return Self::parse_interval(interval.trim(), expr);
        }

        if expr.starts_with('@') {
            let fields = match expr {
                "@hourly" => "0 * * * *",
                "@daily" | "@midnight" => "0 0 * * *",
                "@weekly" => "0 0 * * 0",
                "@monthly" => "0 0 1 * *",
                "@yearly" | "@annually" => "0 0 1 1 *",
                other => return Err(ScheduleParseError::UnknownMacro(other.to_string())),
            };
            return Self::parse_cron(fields, expr);
        }

        if expr.split_whitespace().count() == 5 {
            return Self::parse_cron(expr, expr);
        }

        Self::parse_interval(expr, expr)
    }

    fn parse_interval(interval: &str, original: &str) -> Result<Self, ScheduleParseError> {
        let duration = parse_duration(interval).map_err(|source| ScheduleParseError::Interval {
            expression: original.to_string(),
            source,
        })?;
        if duration < Duration::from_secs(1) {
            return Err(ScheduleParseError::IntervalTooShort(original.to_string()));
        }
        Ok(Self::Every(duration))
    }

    fn parse_cron(fields: &str, original: &str) -> Result<Self, ScheduleParseError> {
        let expression = CronExpression::parse(fields).map_err(|source| {
            ScheduleParseError::Cron { expression: original.to_string(), source }
        })?;
        Ok(Self::Cron { expression, source: original.to_string() })
    }

    /// Next due time strictly after `last_fired`
    ///
    /// Intervals are measured from `last_fired`, so a caller that passes the
    /// completion time skips any fires missed while the run was in progress.
    pub fn next_after(&self, last_fired: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                last_fired.checked_add_signed(step)
            }
            Self::Cron { expression, .. } => expression.next_after(&last_fired),
        }
    }

    /// Nominal period between two consecutive fires following `from`
    ///
    /// Used to judge staleness; for cron schedules this is the gap between
    /// the next two matches.
    pub fn period_after(&self, from: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Every(interval) => Some(*interval),
            Self::Cron { expression, .. } => {
                let first = expression.next_after(&from)?;
                let second = expression.next_after(&first)?;
                (second - first).to_std().ok()
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(interval) => write!(f, "@every {}", format_duration(*interval)),
            Self::Cron { source, .. } => f.write_str(source),
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
