//! Adapter and sink types available to definitions

use std::sync::Arc;

use dora_core::{ComponentCatalog, Sink, SourceAdapter};
use dora_domain::{EventKind, Result, SinkSpec, SourceSpec};

use crate::adapters::AdapterRegistry;
use crate::export::SinkFactory;

/// Adapter registry and sink factory behind one catalog
#[derive(Debug)]
pub struct Components {
    adapters: AdapterRegistry,
    sinks: SinkFactory,
}

impl Components {
    pub fn new(adapters: AdapterRegistry, sinks: SinkFactory) -> Self {
        Self { adapters, sinks }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn sinks(&self) -> &SinkFactory {
        &self.sinks
    }

    pub fn build_source(&self, spec: &SourceSpec) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters.build(spec)
    }

    pub fn build_sinks(&self, specs: &[SinkSpec]) -> Result<Vec<Arc<dyn Sink>>> {
        self.sinks.build_enabled(specs)
    }
}

impl ComponentCatalog for Components {
    fn source_provides(&self, source: &SourceSpec) -> Option<Vec<EventKind>> {
        self.adapters.provides(source)
    }

    fn check_sink(&self, sink: &SinkSpec) -> std::result::Result<(), String> {
        self.sinks.check(sink)
    }
}
