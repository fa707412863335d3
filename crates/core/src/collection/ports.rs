//! Port interfaces for event collection
//!
//! These traits define the boundary between collection runs and the
//! source adapters that talk to external systems.

use async_trait::async_trait;
use dora_domain::{AdapterError, EventKind, LabelFilter, RawEvent, SinkSpec, SourceSpec, TimeRange};
use futures::stream::BoxStream;

/// Lazily paged stream of events; each item is one event or the error that
/// ended the stream
pub type EventStream = BoxStream<'static, Result<RawEvent, AdapterError>>;

/// Trait for pulling raw events from an external system
///
/// Implementations fetch pages on demand as the stream is polled, so a
/// dropped stream stops issuing requests.
pub trait SourceAdapter: Send + Sync {
    /// Event kinds this adapter can produce
    fn provides(&self) -> &[EventKind];

    /// Stream events relevant to `window`, restricted by `filter`
    ///
    /// Commits may predate `window.start`; deployments and incidents fall
    /// inside the window.
    fn fetch(&self, window: TimeRange, filter: LabelFilter) -> EventStream;
}

/// Trait for turning credential references into secrets
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve a reference such as `env:GITHUB_TOKEN`
    ///
    /// A missing secret is an [`AdapterError::Auth`].
    async fn resolve(&self, reference: &str) -> Result<String, AdapterError>;
}

/// Trait describing which adapter and sink types are available
pub trait ComponentCatalog: Send + Sync {
    /// Event kinds a source would provide, or `None` for an unknown type
    fn source_provides(&self, source: &SourceSpec) -> Option<Vec<EventKind>>;

    /// Check a `SinkSpec`; `Err` carries the reason
    fn check_sink(&self, sink: &SinkSpec) -> Result<(), String>;
}
