//! Cron expression parsing and evaluation
//!
//! Standard five-field format: `minute hour day-of-month month day-of-week`.
//! Each field accepts `*`, single values, ranges (`9-17`), steps (`*/15`,
//! `0-30/10`) and comma-separated lists of those. When both day-of-month and
//! day-of-week are restricted, a time matches if either one matches. A field
//! starting with `*` (including `*/2`) is unrestricted.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Error type for cron parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronParseError {
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Too many fields: expected 5, got {0}")]
    TooManyFields(usize),

    #[error("Too few fields: expected 5, got {0}")]
    TooFewFields(usize),
}

/// Upper bound for the forward search in [`CronExpression::next_after`].
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

/// A parsed cron expression
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "foundation")]
/// # {
/// use chrono::{TimeZone, Utc};
/// use dora_common::time::cron::CronExpression;
///
/// // Every Monday at 9am
/// let cron = CronExpression::parse("0 9 * * 1").unwrap();
/// let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();
/// assert_eq!(
///     cron.next_after(&sunday),
///     Some(Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap())
/// );
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

impl CronExpression {
    /// Parse a cron expression from a string
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();

        if parts.len() < 5 {
            return Err(CronParseError::TooFewFields(parts.len()));
        }
        if parts.len() > 5 {
            return Err(CronParseError::TooManyFields(parts.len()));
        }

        let mut weekday = CronField::parse(parts[4], 0, 7)?;
        // 7 is an alias for Sunday
        if weekday.contains(7) {
            weekday.allowed |= 1;
            weekday.allowed &= !(1 << 7);
        }

        Ok(Self {
            minute: CronField::parse(parts[0], 0, 59)?,
            hour: CronField::parse(parts[1], 0, 23)?,
            day: CronField::parse(parts[2], 1, 31)?,
            month: CronField::parse(parts[3], 1, 12)?,
            weekday,
        })
    }

    /// Check if a datetime matches this cron expression (seconds ignored)
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute.contains(dt.minute())
            && self.hour.contains(dt.hour())
            && self.month.contains(dt.month())
            && self.day_matches(dt)
    }

    /// Get the first matching minute strictly after the given datetime
    ///
    /// Returns `None` when nothing matches within five years (for example
    /// `0 0 31 2 *`).
    pub fn next_after(&self, dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let truncated = dt.with_second(0)?.with_nanosecond(0)?;
        let mut current = truncated + Duration::minutes(1);
        let horizon = current + Duration::days(SEARCH_HORIZON_DAYS);

        while current <= horizon {
            if !self.month.contains(current.month()) {
                current = start_of_next_month(&current)?;
                continue;
            }
            if !self.day_matches(&current) {
                current = start_of_day(&current)? + Duration::days(1);
                continue;
            }
            if !self.hour.contains(current.hour()) {
                current = current.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(current.minute()) {
                current += Duration::minutes(1);
                continue;
            }
            return Some(current);
        }

        None
    }

    fn day_matches(&self, dt: &DateTime<Utc>) -> bool {
        let dom = self.day.contains(dt.day());
        let dow = self.weekday.contains(dt.weekday().num_days_from_sunday());
        if self.day.restricted && self.weekday.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {} {}", self.minute, self.hour, self.day, self.month, self.weekday)
    }
}

fn start_of_day(dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let naive = dt.date_naive().and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn start_of_next_month(dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if dt.month() == 12 { (dt.year() + 1, 1) } else { (dt.year(), dt.month() + 1) };
    let naive = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// One cron field, normalised to a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    allowed: u64,
    restricted: bool,
    source: String,
}

impl CronField {
    fn parse(s: &str, min: u32, max: u32) -> Result<Self, CronParseError> {
        if s.is_empty() {
            return Err(CronParseError::InvalidField(s.to_string()));
        }

        let mut allowed = 0_u64;
        for part in s.split(',') {
            allowed |= Self::parse_part(part.trim(), min, max)?;
        }

        Ok(Self { allowed, restricted: !s.starts_with('*'), source: s.to_string() })
    }

    fn parse_part(part: &str, min: u32, max: u32) -> Result<u64, CronParseError> {
        let invalid = || CronParseError::InvalidField(part.to_string());

        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(CronParseError::InvalidRange(format!("step 0 in {part}")));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid())?;
            let b: u32 = b.parse().map_err(|_| invalid())?;
            (a, b)
        } else {
            let v: u32 = base.parse().map_err(|_| invalid())?;
            if step.is_some() {
                (v, max)
            } else {
                (v, v)
            }
        };

        if start < min || end > max || start > end {
            return Err(CronParseError::InvalidRange(format!(
                "{start}-{end} not valid in range {min}-{max}"
            )));
        }

        let step = step.unwrap_or(1);
        let mut mask = 0_u64;
        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
        Ok(mask)
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.allowed & (1 << value) != 0
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
