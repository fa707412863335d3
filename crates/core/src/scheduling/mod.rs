//! Schedule registry: which (definition, indicator) runs are due, and the
//! execution state machine around each run

pub mod registry;

pub use registry::{Claim, Completion, RetryPolicy, RunOutcome, ScheduleRegistry, TriggerOutcome, UpsertOutcome};
