//! # DORA Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Indicator calculators and performance classification
//! - The schedule registry state machine
//! - Collection runs over source adapter streams
//! - Definition validation
//! - Port interfaces (traits) for adapters, sinks, status and definitions
//!
//! ## Architecture Principles
//! - Only depends on `dora-common` and `dora-domain`
//! - No HTTP, file or network code
//! - All external dependencies via traits
//! - Calculators are deterministic functions of their input events

pub mod calculation;
pub mod collection;
pub mod definitions;
pub mod export;
pub mod scheduling;
pub mod status;

// Re-export specific items to avoid ambiguity
pub use calculation::{calculate, classify, evaluate, CalculationOptions};
pub use collection::ports::{ComponentCatalog, CredentialResolver, EventStream, SourceAdapter};
pub use collection::{collect_events, execute, BoundSource, CollectionPlan};
pub use definitions::ports::DefinitionSource;
pub use definitions::validation::validate_definition;
pub use export::ports::{Sink, SinkMode};
pub use scheduling::{Claim, RetryPolicy, RunOutcome, ScheduleRegistry, TriggerOutcome, UpsertOutcome};
pub use status::ports::StatusStore;
