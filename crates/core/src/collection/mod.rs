//! Collection runs: fetch events from the bound sources of one indicator and
//! evaluate it over a window

pub mod ports;
pub mod service;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dora_domain::{
    CollectionError, EntryKey, Indicator, IndicatorSpec, LabelFilter, MetricResult, MetricValue,
    PerformanceLevel, TimeRange,
};

pub use ports::{ComponentCatalog, CredentialResolver, EventStream, SourceAdapter};
pub use service::{collect_events, execute};

/// A configured adapter instance together with its label filter
#[derive(Clone)]
pub struct BoundSource {
    pub name: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub filter: LabelFilter,
}

impl BoundSource {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn SourceAdapter>, filter: LabelFilter) -> Self {
        Self { name: name.into(), adapter, filter }
    }
}

impl fmt::Debug for BoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSource")
            .field("name", &self.name)
            .field("provides", &self.adapter.provides())
            .field("filter", &self.filter)
            .finish()
    }
}

/// Everything a run of one (definition, indicator) needs
#[derive(Debug, Clone)]
pub struct CollectionPlan {
    pub definition: String,
    pub spec: IndicatorSpec,
    /// Only sources that provide a kind the indicator consumes
    pub sources: Vec<BoundSource>,
}

impl CollectionPlan {
    /// Build a plan, keeping only the sources relevant to the indicator
    ///
    /// An adapter failure therefore only affects indicators that read the
    /// adapter's event kinds.
    pub fn new(
        definition: impl Into<String>,
        spec: IndicatorSpec,
        sources: impl IntoIterator<Item = BoundSource>,
    ) -> Self {
        let consumed = spec.name.consumed_kinds();
        let sources = sources
            .into_iter()
            .filter(|source| source.adapter.provides().iter().any(|kind| consumed.contains(kind)))
            .collect();
        Self { definition: definition.into(), spec, sources }
    }

    pub fn indicator(&self) -> Indicator {
        self.spec.name
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.definition.clone(), self.spec.name)
    }

    /// The trailing window for a run firing at `end`
    pub fn window_ending_at(&self, end: DateTime<Utc>) -> TimeRange {
        TimeRange::ending_at(end, self.spec.window)
    }

    /// Wrap a run outcome into a result
    pub fn result(
        &self,
        window: TimeRange,
        computed_at: DateTime<Utc>,
        outcome: &Result<(MetricValue, PerformanceLevel), CollectionError>,
    ) -> MetricResult {
        match outcome {
            Ok((value, level)) => MetricResult::success(
                self.definition.clone(),
                self.spec.name,
                window,
                computed_at,
                value.clone(),
                *level,
            ),
            Err(error) => {
                MetricResult::failure(self.definition.clone(), self.spec.name, window, computed_at, error)
            }
        }
    }
}
