//! Metric definition validation
//!
//! Validation collects every problem of a definition instead of stopping
//! at the first, so the status surfaced to the client is complete.

use std::collections::{BTreeSet, HashSet};

use dora_common::Schedule;
use dora_domain::{DoraError, EventKind, Indicator, MetricDefinition, Result};

use crate::collection::ComponentCatalog;

const MAX_NAME_LEN: usize = 253;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validate a definition against the available adapter and sink types
pub fn validate_definition(definition: &MetricDefinition, catalog: &dyn ComponentCatalog) -> Result<()> {
    let mut problems = Vec::new();

    if !valid_name(&definition.name) {
        problems.push(format!(
            "name '{}' must be 1-{MAX_NAME_LEN} characters of [A-Za-z0-9._-]",
            definition.name
        ));
    }

    if definition.indicators.is_empty() {
        problems.push("at least one indicator is required".to_string());
    }
    let mut seen_indicators = HashSet::new();
    for spec in &definition.indicators {
        if !seen_indicators.insert(spec.name) {
            problems.push(format!("indicator {} is declared more than once", spec.name));
        }
    }

    let mut provided: BTreeSet<EventKind> = BTreeSet::new();
    let mut seen_sources = HashSet::new();
    for source in &definition.sources {
        if !seen_sources.insert(source.display_name()) {
            problems.push(format!("source name '{}' is not unique", source.display_name()));
        }
        match catalog.source_provides(source) {
            Some(kinds) => provided.extend(kinds),
            None => problems.push(format!("unknown source type '{}'", source.kind)),
        }
    }

    let mut seen_sinks = HashSet::new();
    for sink in &definition.sinks {
        if !seen_sinks.insert(sink.display_name()) {
            problems.push(format!("sink name '{}' is not unique", sink.display_name()));
        }
        if let Err(reason) = catalog.check_sink(sink) {
            problems.push(format!("sink '{}': {reason}", sink.display_name()));
        }
    }

    for spec in definition.enabled_indicators() {
        if let Err(e) = Schedule::parse(&spec.schedule) {
            problems.push(format!("indicator {}: {e}", spec.name));
        }
        if spec.window.is_zero() {
            problems.push(format!("indicator {}: window must be positive", spec.name));
        }
        if spec.excluded_windows.iter().any(|w| w.start >= w.end) {
            problems.push(format!("indicator {}: excluded windows must start before they end", spec.name));
        }
        for kind in spec.name.required_kinds() {
            if !provided.contains(kind) {
                problems.push(format!("indicator {} requires {kind} events but no source provides them", spec.name));
            }
        }
        if spec.name == Indicator::ChangeFailureRate {
            if spec.min_deployments == 0 {
                problems.push("indicator change-failure-rate: min_deployments must be at least 1".to_string());
            }
            if provided.contains(&EventKind::Incident) && spec.incident_correlation_window.is_none() {
                problems.push(
                    "indicator change-failure-rate: incident_correlation_window is required when a source provides incidents"
                        .to_string(),
                );
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DoraError::Validation(problems.join("; ")))
    }
}
