//! Modular common utilities shared across the DORA engine crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, duration parsing, schedule
//!   expressions, serde helpers
//! - `runtime`: clock abstraction and exponential backoff with jitter

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod time;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{ExponentialBackoff, Jitter};
#[cfg(feature = "runtime")]
pub use time::clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use time::{format_duration, parse_duration, CronExpression, Schedule, ScheduleParseError};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_str, option_duration_str};
