//! Resilience primitives.
//!
//! Only exponential backoff lives here: the scheduler uses it for collection
//! retries and the export dispatcher for push-sink delivery.

pub mod backoff;

pub use backoff::{ExponentialBackoff, Jitter};
