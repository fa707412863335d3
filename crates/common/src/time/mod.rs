//! Time utilities and abstractions
//!
//! - **[`duration`]**: human duration parsing and formatting (`15m`, `1h 30m`)
//! - **[`cron`]**: five-field cron expression parsing and evaluation
//! - **[`schedule`]**: recurring schedule expressions (interval, macro, cron)
//!   evaluated as a pure `(expression, last fired) -> next due` function
//! - **[`clock`]**: wall-clock abstraction with a controllable mock
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "foundation")]
//! # {
//! use std::time::Duration;
//!
//! use chrono::{TimeZone, Utc};
//! use dora_common::time::{format_duration, parse_duration, Schedule};
//!
//! assert_eq!(parse_duration("2h 30m").unwrap(), Duration::from_secs(9000));
//! assert_eq!(format_duration(Duration::from_secs(3665)), "1h1m5s");
//!
//! let schedule = Schedule::parse("@every 15m").unwrap();
//! let last = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
//! assert_eq!(
//!     schedule.next_after(last),
//!     Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap())
//! );
//! # }
//! ```

#[cfg(feature = "runtime")]
pub mod clock;
pub mod cron;
pub mod duration;
pub mod schedule;

pub use cron::{CronExpression, CronParseError};
pub use duration::{format_duration, parse_duration, DurationParseError};
pub use schedule::{Schedule, ScheduleParseError};
