//! Static events from a JSON fixture or an inline list
//!
//! Scope keys:
//! - `events`: inline list of events
//! - `path`: JSON file holding a list of events (or `{"events": [...]}`)
//! - `provides`: declared event kinds (defaults to the inline kinds, or all)
//! - `fail_with`: `auth`, `rate_limit`, `transient` or `permanent`; every
//!   fetch fails with that error, for dry runs of failure handling

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use dora_core::{EventStream, SourceAdapter};
use dora_domain::{AdapterError, DoraError, EventKind, LabelFilter, RawEvent, Result, SourceSpec, TimeRange};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;

use super::scope_kinds;

pub const TYPE: &str = "static";

const ALL_KINDS: [EventKind; 3] = [EventKind::Commit, EventKind::Deployment, EventKind::Incident];

/// Event kinds a `static` source provides
pub fn provides(spec: &SourceSpec) -> Vec<EventKind> {
    if let Some(kinds) = scope_kinds(spec) {
        return kinds;
    }
    match inline_events(spec) {
        Some(Ok(events)) if !events.is_empty() => {
            events.iter().map(|e| e.kind).collect::<BTreeSet<_>>().into_iter().collect()
        }
        _ => ALL_KINDS.to_vec(),
    }
}

fn inline_events(spec: &SourceSpec) -> Option<std::result::Result<Vec<RawEvent>, serde_json::Error>> {
    spec.scope.get("events").map(|value| serde_json::from_value(value.clone()))
}

#[derive(Debug, Clone)]
enum Events {
    Inline(Arc<Vec<RawEvent>>),
    File(PathBuf),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    List(Vec<RawEvent>),
    Wrapped { events: Vec<RawEvent> },
}

/// Adapter replaying fixed events
#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    events: Events,
    provides: Vec<EventKind>,
    fail_with: Option<AdapterError>,
}

impl FixtureAdapter {
    /// Adapter over an in-memory list
    pub fn new(events: Vec<RawEvent>, provides: Vec<EventKind>) -> Self {
        Self { events: Events::Inline(Arc::new(events)), provides, fail_with: None }
    }

    /// Adapter whose every fetch fails with `error`
    pub fn failing(provides: Vec<EventKind>, error: AdapterError) -> Self {
        Self { events: Events::Inline(Arc::new(Vec::new())), provides, fail_with: Some(error) }
    }

    /// Build from a `SourceSpec`
    ///
    /// # Errors
    /// `DoraError::Validation` when neither `events` nor `path` is given, the
    /// inline events do not parse, or `fail_with` is unknown.
    pub fn from_spec(spec: &SourceSpec) -> Result<Self> {
        let name = spec.display_name();
        let events = match (inline_events(spec), spec.scope_strings("path").into_iter().next()) {
            (Some(Ok(events)), _) => Events::Inline(Arc::new(events)),
            (Some(Err(e)), _) => {
                return Err(DoraError::Validation(format!("source '{name}': invalid inline events: {e}")))
            }
            (None, Some(path)) => Events::File(PathBuf::from(path)),
            (None, None) => {
                return Err(DoraError::Validation(format!(
                    "source '{name}': static sources need scope.events or scope.path"
                )))
            }
        };

        let fail_with = match spec.scope_strings("fail_with").into_iter().next().as_deref() {
            None => None,
            Some("auth") => Some(AdapterError::auth("static source configured to reject credentials")),
            Some("rate_limit") => Some(AdapterError::rate_limit("static source configured to throttle", None)),
            Some("transient") => Some(AdapterError::transient("static source configured to drop connections")),
            Some("permanent") => Some(AdapterError::permanent("static source configured as misconfigured")),
            Some(other) => {
                return Err(DoraError::Validation(format!("source '{name}': unknown fail_with '{other}'")))
            }
        };

        Ok(Self { events, provides: provides(spec), fail_with })
    }
}

impl SourceAdapter for FixtureAdapter {
    fn provides(&self) -> &[EventKind] {
        &self.provides
    }

    fn fetch(&self, window: TimeRange, _filter: LabelFilter) -> EventStream {
        let adapter = self.clone();
        stream::once(async move {
            if let Some(error) = adapter.fail_with {
                return Err(error);
            }
            let events = match adapter.events {
                Events::Inline(events) => events.as_ref().clone(),
                Events::File(path) => load(&path).await?,
            };
            let selected: Vec<_> = events
                .into_iter()
                .filter(|event| adapter.provides.contains(&event.kind) && in_window(event, window))
                .map(Ok)
                .collect();
            Ok(stream::iter(selected))
        })
        .try_flatten()
        .boxed()
    }
}

/// Commits may predate the window; everything else falls inside it
fn in_window(event: &RawEvent, window: TimeRange) -> bool {
    match event.kind {
        EventKind::Commit => event.timestamp < window.end,
        EventKind::Deployment | EventKind::Incident => window.contains(event.timestamp),
    }
}

async fn load(path: &PathBuf) -> std::result::Result<Vec<RawEvent>, AdapterError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        AdapterError::permanent(format!("cannot read fixture {}: {e}", path.display()))
    })?;
    let file: FixtureFile = serde_json::from_str(&contents)
        .map_err(|e| AdapterError::permanent(format!("invalid fixture {}: {e}", path.display())))?;
    Ok(match file {
        FixtureFile::List(events) | FixtureFile::Wrapped { events } => events,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn january() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn spec(scope: serde_json::Value) -> SourceSpec {
        let mut spec = SourceSpec::new(TYPE);
        spec.scope = serde_json::from_value(scope).unwrap();
        spec
    }

    #[test]
    fn provides_defaults_to_inline_kinds() {
        let spec = spec(json!({"events": [
            {"kind": "incident", "id": "P1", "timestamp": "2024-01-10T10:00:00Z"}
        ]}));
        assert_eq!(provides(&spec), vec![EventKind::Incident]);
        assert_eq!(provides(&self::spec(json!({"path": "events.json"}))), ALL_KINDS.to_vec());
    }

    #[test]
    fn from_spec_requires_events_or_path() {
        assert!(FixtureAdapter::from_spec(&spec(json!({}))).is_err());
        assert!(FixtureAdapter::from_spec(&spec(json!({"events": [{"kind": "bogus"}]}))).is_err());
        assert!(FixtureAdapter::from_spec(&spec(json!({"path": "x.json", "fail_with": "boom"}))).is_err());
    }

    #[tokio::test]
    async fn filters_events_to_window() {
        let adapter = FixtureAdapter::from_spec(&spec(json!({"events": [
            {"kind": "commit", "id": "c0", "timestamp": "2023-12-30T10:00:00Z"},
            {"kind": "deployment", "id": "d0", "timestamp": "2023-12-31T10:00:00Z", "outcome": "success"},
            {"kind": "deployment", "id": "d1", "timestamp": "2024-01-02T10:00:00Z", "outcome": "success"},
            {"kind": "incident", "id": "P1", "timestamp": "2024-02-02T10:00:00Z"}
        ]})))
        .unwrap();

        let ids: Vec<String> =
            adapter.fetch(january(), LabelFilter::new()).map_ok(|e| e.id).try_collect().await.unwrap();
        assert_eq!(ids, vec!["c0", "d1"]);
    }

    #[tokio::test]
    async fn loads_wrapped_fixture_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"events": [{{"kind": "incident", "id": "P1", "timestamp": "2024-01-10T10:00:00Z", "resolved_at": "2024-01-10T10:45:00Z"}}]}}"#
        )
        .unwrap();

        let adapter = FixtureAdapter::from_spec(&spec(json!({
            "path": file.path().to_string_lossy(),
            "provides": ["incident"]
        })))
        .unwrap();
        let events: Vec<RawEvent> = adapter.fetch(january(), LabelFilter::new()).try_collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn configured_failure_is_returned_by_fetch() {
        let adapter = FixtureAdapter::from_spec(&spec(json!({"events": [], "fail_with": "auth"}))).unwrap();
        let result: std::result::Result<Vec<RawEvent>, _> =
            adapter.fetch(january(), LabelFilter::new()).try_collect().await;
        assert!(matches!(result, Err(AdapterError::Auth(_))));
    }

    #[tokio::test]
    async fn missing_file_is_permanent_config_error() {
        let adapter = FixtureAdapter::from_spec(&spec(json!({"path": "/nonexistent/fixture.json"}))).unwrap();
        let result: std::result::Result<Vec<RawEvent>, _> =
            adapter.fetch(january(), LabelFilter::new()).try_collect().await;
        assert!(matches!(result, Err(AdapterError::PermanentConfig(_))));
    }
}
