//! Duration parsing from strings
//!
//! Human duration strings are used throughout definition documents and engine
//! configuration (`window = "30d"`, `run_timeout = "2m"`).

use std::time::Duration;

use thiserror::Error;

/// Error type for duration parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("Invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Empty duration string")]
    EmptyString,
}

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3_600.0;
const SECS_PER_DAY: f64 = 86_400.0;
const SECS_PER_WEEK: f64 = 604_800.0;

/// Parse a duration string into a Duration
///
/// Supports the following units, optionally combined and separated by
/// whitespace: `ms`, `s`, `m`, `h`, `d`, `w`.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "foundation")]
/// # {
/// use std::time::Duration;
///
/// use dora_common::time::duration::parse_duration;
///
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
/// assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("1s500ms").unwrap(), Duration::from_millis(1500));
/// # }
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::EmptyString);
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if number.is_empty() {
            return Err(DurationParseError::InvalidFormat(
                "Expected number before unit".to_string(),
            ));
        }
        let value: f64 =
            number.parse().map_err(|_| DurationParseError::InvalidNumber(number.clone()))?;

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let seconds = match unit.as_str() {
            "" => {
                return Err(DurationParseError::InvalidFormat(
                    "Missing unit after number".to_string(),
                ))
            }
            "ms" => value / 1_000.0,
            "s" => value,
            "m" => value * SECS_PER_MINUTE,
            "h" => value * SECS_PER_HOUR,
            "d" => value * SECS_PER_DAY,
            "w" => value * SECS_PER_WEEK,
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };

        total += Duration::try_from_secs_f64(seconds)
            .map_err(|_| DurationParseError::InvalidNumber(number))?;
    }

    Ok(total)
}

/// Format a duration compactly using the largest whole units
///
/// The output is accepted by [`parse_duration`], so it is suitable for
/// serializing configuration back to disk.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let mut remaining_secs = duration.as_secs();
    let millis = duration.subsec_millis();
    let mut out = String::new();

    for (unit, size) in [("d", 86_400_u64), ("h", 3_600), ("m", 60), ("s", 1)] {
        let count = remaining_secs / size;
        if count > 0 {
            out.push_str(&format!("{count}{unit}"));
            remaining_secs %= size;
        }
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }

    out
}
