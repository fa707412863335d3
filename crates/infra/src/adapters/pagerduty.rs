//! PagerDuty incidents
//!
//! Scope keys:
//! - `service_ids`: restrict to these PagerDuty services
//! - `team_ids`: restrict to these teams
//! - `service_map`: PagerDuty service name or id → `service` label, so that
//!   incidents line up with deployment services
//! - `limit`: page size (default 100)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dora_core::{CredentialResolver, EventStream, SourceAdapter};
use dora_domain::constants::{LABEL_SERVICE, LABEL_SEVERITY, LABEL_SOURCE, LABEL_TEAM};
use dora_domain::{AdapterError, EventKind, LabelFilter, RawEvent, Result, SourceSpec, TimeRange};
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{base_url, classify_status, join, scope_u32};
use crate::errors::IntoAdapterError;
use crate::http::HttpClient;

pub const TYPE: &str = "pagerduty";
pub const DEFAULT_ENDPOINT: &str = "https://api.pagerduty.com";

const MEDIA_TYPE: &str = "application/vnd.pagerduty+json;version=2";
const DEFAULT_LIMIT: u32 = 100;

/// Event kinds a `pagerduty` source provides
pub fn provides(_spec: &SourceSpec) -> Vec<EventKind> {
    vec![EventKind::Incident]
}

/// Adapter over the PagerDuty REST API v2
pub struct PagerDutyAdapter {
    client: Arc<Client>,
}

struct Client {
    http: HttpClient,
    base: Url,
    service_ids: Vec<String>,
    team_ids: Vec<String>,
    service_map: BTreeMap<String, String>,
    limit: u32,
    credential: Option<String>,
    resolver: Arc<dyn CredentialResolver>,
}

impl PagerDutyAdapter {
    /// Build from a `SourceSpec`
    ///
    /// # Errors
    /// `DoraError::Validation` when the endpoint is not a URL.
    pub fn from_spec(spec: &SourceSpec, http: HttpClient, resolver: Arc<dyn CredentialResolver>) -> Result<Self> {
        let service_map = spec
            .scope
            .get("service_map")
            .and_then(serde_json::Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let client = Client {
            http,
            base: base_url(spec, DEFAULT_ENDPOINT)?,
            service_ids: spec.scope_strings("service_ids"),
            team_ids: spec.scope_strings("team_ids"),
            service_map,
            limit: scope_u32(spec, "limit").unwrap_or(DEFAULT_LIMIT).min(DEFAULT_LIMIT),
            credential: spec.credential.clone(),
            resolver,
        };
        Ok(Self { client: Arc::new(client) })
    }
}

impl fmt::Debug for PagerDutyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagerDutyAdapter")
            .field("base", &self.client.base.as_str())
            .field("service_ids", &self.client.service_ids)
            .finish()
    }
}

impl SourceAdapter for PagerDutyAdapter {
    fn provides(&self) -> &[EventKind] {
        &[EventKind::Incident]
    }

    fn fetch(&self, window: TimeRange, _filter: LabelFilter) -> EventStream {
        let client = Arc::clone(&self.client);
        stream::once(async move {
            let Some(reference) = &client.credential else {
                return Err(AdapterError::auth("pagerduty source has no credential configured"));
            };
            let token = client.resolver.resolve(reference).await?;
            Ok(client.incidents(token, window))
        })
        .try_flatten()
        .boxed()
    }
}

impl Client {
    /// Incidents created inside `window`, paged by offset
    fn incidents(self: &Arc<Self>, token: String, window: TimeRange) -> EventStream {
        let client = Arc::clone(self);
        stream::try_unfold(Some(0u32), move |offset| {
            let client = Arc::clone(&client);
            let token = token.clone();
            async move {
                let Some(offset) = offset else {
                    return Ok(None);
                };

                let page = client.page(&token, window, offset).await?;
                debug!(offset, count = page.incidents.len(), more = page.more, "fetched incidents page");

                let next = (page.more && !page.incidents.is_empty())
                    .then(|| offset.saturating_add(u32::try_from(page.incidents.len()).unwrap_or(u32::MAX)));
                let events: Vec<_> = page
                    .incidents
                    .into_iter()
                    .filter(|incident| window.contains(incident.created_at))
                    .map(|incident| Ok(client.to_event(incident)))
                    .collect();

                Ok::<_, AdapterError>(Some((stream::iter(events), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn page(&self, token: &str, window: TimeRange, offset: u32) -> std::result::Result<IncidentPage, AdapterError> {
        let mut query = vec![
            ("since", window.start.to_rfc3339()),
            ("until", window.end.to_rfc3339()),
            ("offset", offset.to_string()),
            ("limit", self.limit.to_string()),
            ("time_zone", "UTC".to_string()),
        ];
        query.extend(self.service_ids.iter().map(|id| ("service_ids[]", id.clone())));
        query.extend(self.team_ids.iter().map(|id| ("team_ids[]", id.clone())));

        let request = self
            .http
            .request(Method::GET, join(&self.base, "incidents")?)
            .query(&query)
            .header(ACCEPT, MEDIA_TYPE)
            .header(AUTHORIZATION, format!("Token token={token}"));

        let response = self.http.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }
        response.json().await.map_err(IntoAdapterError::into_adapter_error)
    }

    fn to_event(&self, incident: Incident) -> RawEvent {
        let resolved_at = (incident.status == "resolved")
            .then(|| incident.resolved_at.or(incident.last_status_change_at))
            .flatten();

        let mut event = RawEvent::incident(incident.id, incident.created_at, resolved_at)
            .with_label(LABEL_SOURCE, TYPE);
        if let Some(urgency) = incident.urgency {
            event = event.with_label(LABEL_SEVERITY, urgency);
        }
        if let Some(service) = incident.service {
            let mapped = self
                .service_map
                .get(&service.id)
                .or_else(|| service.summary.as_ref().and_then(|s| self.service_map.get(s)))
                .cloned()
                .or(service.summary);
            if let Some(name) = mapped {
                event = event.with_label(LABEL_SERVICE, name);
            }
        }
        if let Some(team) = incident.teams.into_iter().find_map(|t| t.summary) {
            event = event.with_label(LABEL_TEAM, team);
        }
        event
    }
}

#[derive(Debug, Deserialize)]
struct IncidentPage {
    #[serde(default)]
    incidents: Vec<Incident>,
    #[serde(default)]
    more: bool,
}

#[derive(Debug, Deserialize)]
struct Incident {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_status_change_at: Option<DateTime<Utc>>,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    service: Option<Reference>,
    #[serde(default)]
    teams: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
}
