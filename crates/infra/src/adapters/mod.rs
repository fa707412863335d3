//! Source adapters and the registry that builds them from definitions
//!
//! The registry maps a source `type` string to a factory. It is populated
//! once at startup; an unknown type is a validation error of the definition
//! that uses it.

pub mod credentials;
pub mod fixture;
pub mod github;
pub mod pagerduty;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dora_core::{CredentialResolver, SourceAdapter};
use dora_domain::{AdapterError, DoraError, EventKind, Result, SourceSpec};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use url::Url;

use crate::http::HttpClient;

pub use credentials::{EnvCredentialResolver, StaticCredentialResolver};
pub use fixture::FixtureAdapter;
pub use github::GithubAdapter;
pub use pagerduty::PagerDutyAdapter;

type ProvidesFn = dyn Fn(&SourceSpec) -> Vec<EventKind> + Send + Sync;
type FactoryFn = dyn Fn(&SourceSpec) -> Result<Arc<dyn SourceAdapter>> + Send + Sync;

struct Registration {
    provides: Box<ProvidesFn>,
    factory: Box<FactoryFn>,
}

/// Source `type` → adapter factory
#[derive(Default)]
pub struct AdapterRegistry {
    registrations: BTreeMap<String, Registration>,
}

impl AdapterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `github`, `pagerduty` and `static` adapters
    pub fn with_defaults(http: HttpClient, credentials: Arc<dyn CredentialResolver>) -> Self {
        let mut registry = Self::new();

        let (gh_http, gh_credentials) = (http.clone(), Arc::clone(&credentials));
        registry.register(github::TYPE, github::provides, move |spec| {
            Ok(Arc::new(GithubAdapter::from_spec(spec, gh_http.clone(), Arc::clone(&gh_credentials))?)
                as Arc<dyn SourceAdapter>)
        });

        let (pd_http, pd_credentials) = (http, credentials);
        registry.register(pagerduty::TYPE, pagerduty::provides, move |spec| {
            Ok(Arc::new(PagerDutyAdapter::from_spec(spec, pd_http.clone(), Arc::clone(&pd_credentials))?)
                as Arc<dyn SourceAdapter>)
        });

        registry.register(fixture::TYPE, fixture::provides, |spec| {
            Ok(Arc::new(FixtureAdapter::from_spec(spec)?) as Arc<dyn SourceAdapter>)
        });

        registry
    }

    /// Register (or replace) the factory for `kind`
    pub fn register<P, F>(&mut self, kind: impl Into<String>, provides: P, factory: F)
    where
        P: Fn(&SourceSpec) -> Vec<EventKind> + Send + Sync + 'static,
        F: Fn(&SourceSpec) -> Result<Arc<dyn SourceAdapter>> + Send + Sync + 'static,
    {
        self.registrations
            .insert(kind.into(), Registration { provides: Box::new(provides), factory: Box::new(factory) });
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.registrations.contains_key(kind)
    }

    /// Registered types, sorted
    pub fn kinds(&self) -> Vec<&str> {
        self.registrations.keys().map(String::as_str).collect()
    }

    /// Event kinds a source would provide, without building it
    pub fn provides(&self, spec: &SourceSpec) -> Option<Vec<EventKind>> {
        self.registrations.get(&spec.kind).map(|r| (r.provides)(spec))
    }

    /// Build the adapter for `spec`
    ///
    /// # Errors
    /// `DoraError::Validation` for an unknown type or an invalid scope.
    pub fn build(&self, spec: &SourceSpec) -> Result<Arc<dyn SourceAdapter>> {
        let registration = self.registrations.get(&spec.kind).ok_or_else(|| {
            DoraError::Validation(format!(
                "source '{}': unknown adapter type '{}'",
                spec.display_name(),
                spec.kind
            ))
        })?;
        (registration.factory)(spec)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry").field("kinds", &self.kinds()).finish()
    }
}

/// Map a non-success HTTP response to the adapter error taxonomy
///
/// - 401 → auth
/// - 403 → auth, or rate limit when `x-ratelimit-remaining` is `0`
/// - 429 → rate limit, honouring `retry-after`
/// - other 4xx → permanent configuration error
/// - 5xx → transient
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> AdapterError {
    let message = format!("HTTP {} {}", status.as_u16(), status.canonical_reason().unwrap_or("unknown status"));

    match status.as_u16() {
        401 => AdapterError::auth(message),
        403 if header_u64(headers, "x-ratelimit-remaining") == Some(0) => {
            AdapterError::rate_limit(message, rate_limit_reset(headers))
        }
        403 => AdapterError::auth(message),
        429 => AdapterError::rate_limit(
            message,
            header_u64(headers, RETRY_AFTER.as_str()).map(Duration::from_secs).or_else(|| rate_limit_reset(headers)),
        ),
        400..=499 => AdapterError::permanent(message),
        _ => AdapterError::transient(message),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Delay until the epoch second in `x-ratelimit-reset`
fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
    let reset = i64::try_from(header_u64(headers, "x-ratelimit-reset")?).ok()?;
    let wait = reset.saturating_sub(Utc::now().timestamp()).max(0);
    u64::try_from(wait).ok().map(Duration::from_secs)
}

/// Base URL of an adapter endpoint, normalized to end with `/`
pub(crate) fn base_url(spec: &SourceSpec, default: &str) -> Result<Url> {
    let raw = spec.endpoint.as_deref().unwrap_or(default);
    let normalized = if raw.ends_with('/') { raw.to_string() } else { format!("{raw}/") };
    Url::parse(&normalized).map_err(|e| {
        DoraError::Validation(format!("source '{}': invalid endpoint '{}': {}", spec.display_name(), raw, e))
    })
}

/// Join `path` onto `base`, reporting failures as configuration errors
pub(crate) fn join(base: &Url, path: &str) -> std::result::Result<Url, AdapterError> {
    base.join(path).map_err(|e| AdapterError::permanent(format!("invalid request path '{path}': {e}")))
}

/// Positive integer from `scope[key]`
pub(crate) fn scope_u32(spec: &SourceSpec, key: &str) -> Option<u32> {
    spec.scope.get(key).and_then(serde_json::Value::as_u64).and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

/// Event kinds listed in `scope.provides`, if any
pub(crate) fn scope_kinds(spec: &SourceSpec) -> Option<Vec<EventKind>> {
    let kinds: Vec<EventKind> = spec
        .scope_strings("provides")
        .iter()
        .filter_map(|kind| serde_json::from_value(serde_json::Value::String(kind.clone())).ok())
        .collect();
    (!kinds.is_empty()).then_some(kinds)
}

#[cfg(test)]
mod tests {
    use dora_common::ErrorClassification;
    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn classify_status_follows_error_taxonomy() {
        let empty = HeaderMap::new();
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, &empty), AdapterError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, &empty), AdapterError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, &empty), AdapterError::PermanentConfig(_)));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, &empty),
            AdapterError::PermanentConfig(_)
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, &empty).is_retryable());
    }

    #[test]
    fn exhausted_quota_on_403_is_rate_limit() {
        let err = classify_status(StatusCode::FORBIDDEN, &headers(&[("x-ratelimit-remaining", "0")]));
        assert!(matches!(err, AdapterError::RateLimit { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn too_many_requests_reads_retry_after() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers(&[("retry-after", "120")]));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn registry_reports_unknown_types() {
        let registry = AdapterRegistry::with_defaults(
            HttpClient::new().unwrap(),
            Arc::new(StaticCredentialResolver::default()),
        );
        assert_eq!(registry.kinds(), vec!["github", "pagerduty", "static"]);

        let unknown = SourceSpec::new("jira");
        assert!(registry.provides(&unknown).is_none());
        assert!(matches!(registry.build(&unknown), Err(DoraError::Validation(msg)) if msg.contains("jira")));

        assert_eq!(
            registry.provides(&SourceSpec::new("pagerduty")),
            Some(vec![EventKind::Incident])
        );
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let mut spec = SourceSpec::new("github");
        spec.endpoint = Some("https://ghe.example.com/api/v3".into());
        let url = base_url(&spec, github::DEFAULT_ENDPOINT).unwrap();
        assert_eq!(join(&url, "repos/a/b").unwrap().as_str(), "https://ghe.example.com/api/v3/repos/a/b");
    }
}
