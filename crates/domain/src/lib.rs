//! # DORA Domain
//!
//! Business domain types for the DORA metrics engine.
//!
//! This crate contains:
//! - Metric definitions, raw events, results and status records
//! - The error taxonomy shared by adapters, calculators and sinks
//! - Engine configuration structures
//! - Published DORA performance thresholds
//!
//! ## Architecture
//! - Depends only on `dora-common` for duration/schedule helpers
//! - No I/O, no async
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
