//! # DORA Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - Source adapters (GitHub, PagerDuty, static fixtures)
//! - Export sinks (Prometheus, webhook, Pushgateway) and the dispatcher
//! - Definition sources, the status store and configuration loading
//! - The collection scheduler, the reconciliation controller and the
//!   HTTP exposition endpoint
//!
//! ## Architecture
//! - Implements traits defined in `dora-core`
//! - Depends on `dora-common`, `dora-domain` and `dora-core`
//! - Contains all "impure" code (network, files, timers)
//! - [`Engine`] wires every component together

pub mod adapters;
pub mod components;
pub mod config;
pub mod controller;
pub mod definitions;
pub mod engine;
pub mod errors;
pub mod export;
pub mod exposition;
pub mod http;
pub mod scheduling;
pub mod status;

mod fs;

// Re-export commonly used items
pub use adapters::{AdapterRegistry, EnvCredentialResolver, StaticCredentialResolver};
pub use components::Components;
pub use controller::{ReconcileReport, Reconciler};
pub use definitions::{FileDefinitionSource, InMemoryDefinitionSource};
pub use engine::{DefinitionCheck, Engine, EngineBuilder};
pub use errors::InfraError;
pub use export::{DeadLetterLog, ExportDispatcher, PrometheusExporter, SinkFactory};
pub use exposition::{ExpositionServer, ExpositionState};
pub use http::HttpClient;
pub use scheduling::{CollectionScheduler, SchedulerError};
pub use status::InMemoryStatusStore;
