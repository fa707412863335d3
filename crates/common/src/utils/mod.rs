//! Common utility functions
//!
//! - **[`serde`]**: Serialization helpers for human-readable durations

pub mod serde;

pub use self::serde::{duration_str, option_duration_str};
