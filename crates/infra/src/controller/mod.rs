//! Reconciliation controller
//!
//! Keeps the schedule registry, sink registrations and status records in
//! line with the definitions a [`DefinitionSource`](dora_core::DefinitionSource)
//! currently holds, and writes each definition's status back to it.

pub mod reconciler;

pub use reconciler::{ReconcileReport, Reconciler};
