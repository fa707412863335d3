//! Collection scheduling runtime
//!
//! The schedule table and its state machine live in `dora-core`; this module
//! drives it: claiming due entries, running them on a bounded worker pool,
//! recording status and handing terminal results to the export dispatcher.

pub mod collection_scheduler;
pub mod error;

pub use collection_scheduler::CollectionScheduler;
pub use error::{SchedulerError, SchedulerResult};
