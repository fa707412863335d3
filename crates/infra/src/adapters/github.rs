//! GitHub deployments and commits
//!
//! Scope keys:
//! - `repositories`: `owner/name` list (required)
//! - `environment`: only deployments to this environment
//! - `branch`: commits reachable from this branch instead of the default one
//! - `per_page`: page size (default 100)
//! - `provides`: restrict to `commit` and/or `deployment`

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dora_core::{CredentialResolver, EventStream, SourceAdapter};
use dora_domain::constants::{LABEL_ENVIRONMENT, LABEL_REPOSITORY, LABEL_SERVICE, LABEL_SOURCE};
use dora_domain::{AdapterError, DoraError, EventKind, LabelFilter, Outcome, RawEvent, Result, SourceSpec, TimeRange};
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{base_url, classify_status, join, scope_kinds, scope_u32};
use crate::errors::IntoAdapterError;
use crate::http::HttpClient;

pub const TYPE: &str = "github";
pub const DEFAULT_ENDPOINT: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const DEFAULT_PER_PAGE: u32 = 100;
const PROVIDES: [EventKind; 2] = [EventKind::Commit, EventKind::Deployment];

/// Event kinds a `github` source provides
pub fn provides(spec: &SourceSpec) -> Vec<EventKind> {
    scope_kinds(spec)
        .map(|kinds| kinds.into_iter().filter(|kind| PROVIDES.contains(kind)).collect())
        .unwrap_or_else(|| PROVIDES.to_vec())
}

/// Adapter over the GitHub REST API
pub struct GithubAdapter {
    client: Arc<Client>,
    provides: Vec<EventKind>,
}

struct Client {
    http: HttpClient,
    base: Url,
    repositories: Vec<String>,
    environment: Option<String>,
    branch: Option<String>,
    per_page: u32,
    credential: Option<String>,
    resolver: Arc<dyn CredentialResolver>,
}

impl GithubAdapter {
    /// Build from a `SourceSpec`
    ///
    /// # Errors
    /// `DoraError::Validation` when no repository is listed, a repository is
    /// not `owner/name`, or the endpoint is not a URL.
    pub fn from_spec(spec: &SourceSpec, http: HttpClient, resolver: Arc<dyn CredentialResolver>) -> Result<Self> {
        let repositories = spec.scope_strings("repositories");
        if repositories.is_empty() {
            return Err(DoraError::Validation(format!(
                "source '{}': scope.repositories must list at least one owner/name",
                spec.display_name()
            )));
        }
        if let Some(bad) = repositories.iter().find(|r| r.split('/').filter(|p| !p.is_empty()).count() != 2) {
            return Err(DoraError::Validation(format!(
                "source '{}': repository '{}' is not owner/name",
                spec.display_name(),
                bad
            )));
        }

        let client = Client {
            http,
            base: base_url(spec, DEFAULT_ENDPOINT)?,
            repositories,
            environment: spec.scope_strings("environment").into_iter().next(),
            branch: spec.scope_strings("branch").into_iter().next(),
            per_page: scope_u32(spec, "per_page").unwrap_or(DEFAULT_PER_PAGE).min(DEFAULT_PER_PAGE),
            credential: spec.credential.clone(),
            resolver,
        };
        Ok(Self { client: Arc::new(client), provides: provides(spec) })
    }
}

impl fmt::Debug for GithubAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubAdapter")
            .field("base", &self.client.base.as_str())
            .field("repositories", &self.client.repositories)
            .field("provides", &self.provides)
            .finish()
    }
}

impl SourceAdapter for GithubAdapter {
    fn provides(&self) -> &[EventKind] {
        &self.provides
    }

    fn fetch(&self, window: TimeRange, filter: LabelFilter) -> EventStream {
        let client = Arc::clone(&self.client);
        let repositories: Vec<String> = match filter.values(LABEL_REPOSITORY) {
            Some(allowed) => client.repositories.iter().filter(|r| allowed.contains(*r)).cloned().collect(),
            None => client.repositories.clone(),
        };
        let kinds = self.provides.clone();

        stream::once(async move {
            let token = match &client.credential {
                Some(reference) => Some(client.resolver.resolve(reference).await?),
                None => None,
            };
            Ok::<_, AdapterError>(client.events(token, repositories, &kinds, window))
        })
        .try_flatten()
        .boxed()
    }
}

impl Client {
    fn events(
        self: &Arc<Self>,
        token: Option<String>,
        repositories: Vec<String>,
        kinds: &[EventKind],
        window: TimeRange,
    ) -> EventStream {
        let mut streams = Vec::new();
        for repo in repositories {
            if kinds.contains(&EventKind::Deployment) {
                streams.push(self.deployments(repo.clone(), token.clone(), window));
            }
            if kinds.contains(&EventKind::Commit) {
                streams.push(self.commits(repo, token.clone(), window));
            }
        }
        stream::iter(streams).flatten().boxed()
    }

    /// Deployments created inside `window`, newest first
    ///
    /// GitHub lists deployments newest first, so paging stops at the first
    /// page that reaches past `window.start`.
    fn deployments(self: &Arc<Self>, repo: String, token: Option<String>, window: TimeRange) -> EventStream {
        let client = Arc::clone(self);
        stream::try_unfold(Some(1u32), move |page| {
            let client = Arc::clone(&client);
            let repo = repo.clone();
            let token = token.clone();
            async move {
                let Some(page) = page else {
                    return Ok(None);
                };

                let mut query = client.page_query(page);
                if let Some(environment) = &client.environment {
                    query.push(("environment", environment.clone()));
                }
                let items: Vec<Deployment> =
                    client.get(&format!("repos/{repo}/deployments"), token.as_deref(), &query).await?;

                let exhausted = items.len() < client.per_page as usize
                    || items.iter().any(|d| d.created_at < window.start);
                debug!(repository = %repo, page, count = items.len(), "fetched deployments page");

                let mut events = Vec::new();
                for deployment in items.into_iter().filter(|d| window.contains(d.created_at)) {
                    let outcome = client.deployment_outcome(&repo, deployment.id, token.as_deref()).await?;
                    events.push(Ok(deployment.into_event(&repo, outcome)));
                }

                Ok::<_, AdapterError>(Some((stream::iter(events), (!exhausted).then_some(page + 1))))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Commits authored inside `window`
    fn commits(self: &Arc<Self>, repo: String, token: Option<String>, window: TimeRange) -> EventStream {
        let client = Arc::clone(self);
        stream::try_unfold(Some(1u32), move |page| {
            let client = Arc::clone(&client);
            let repo = repo.clone();
            let token = token.clone();
            async move {
                let Some(page) = page else {
                    return Ok(None);
                };

                let mut query = client.page_query(page);
                query.push(("since", window.start.to_rfc3339()));
                query.push(("until", window.end.to_rfc3339()));
                if let Some(branch) = &client.branch {
                    query.push(("sha", branch.clone()));
                }
                let items: Vec<Commit> =
                    client.get(&format!("repos/{repo}/commits"), token.as_deref(), &query).await?;

                let exhausted = items.len() < client.per_page as usize;
                debug!(repository = %repo, page, count = items.len(), "fetched commits page");

                let events: Vec<_> =
                    items.into_iter().filter_map(|commit| commit.into_event(&repo)).map(Ok).collect();

                Ok::<_, AdapterError>(Some((stream::iter(events), (!exhausted).then_some(page + 1))))
            }
        })
        .try_flatten()
        .boxed()
    }

    fn page_query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![("per_page", self.per_page.to_string()), ("page", page.to_string())]
    }

    async fn deployment_outcome(&self, repo: &str, id: u64, token: Option<&str>) -> std::result::Result<Outcome, AdapterError> {
        let statuses: Vec<DeploymentStatus> = self
            .get(&format!("repos/{repo}/deployments/{id}/statuses"), token, &[("per_page", "1".to_string())])
            .await?;

        Ok(statuses.first().map_or(Outcome::Unknown, |status| match status.state.as_str() {
            "success" => Outcome::Success,
            "failure" | "error" => Outcome::Failure,
            _ => Outcome::Unknown,
        }))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        query: &[(&str, String)],
    ) -> std::result::Result<T, AdapterError> {
        let url = join(&self.base, path)?;
        let mut request = self
            .http
            .request(Method::GET, url)
            .query(query)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = self.http.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }
        response.json().await.map_err(IntoAdapterError::into_adapter_error)
    }
}

fn service_name(repo: &str) -> &str {
    repo.rsplit('/').next().unwrap_or(repo)
}

#[derive(Debug, Deserialize)]
struct Deployment {
    id: u64,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    description: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Deployment {
    fn mentions_rollback(&self) -> bool {
        [&self.task, &self.description]
            .into_iter()
            .flatten()
            .any(|text| text.to_ascii_lowercase().contains("rollback"))
    }

    /// Deployment id named by `payload.rollback_of`
    fn rollback_target(&self) -> Option<String> {
        match self.payload.get("rollback_of")? {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    fn into_event(self, repo: &str, outcome: Outcome) -> RawEvent {
        let mut event = RawEvent::deployment(self.id.to_string(), self.created_at, outcome)
            .with_label(LABEL_SERVICE, service_name(repo))
            .with_label(LABEL_REPOSITORY, repo)
            .with_label(LABEL_SOURCE, TYPE);
        if self.mentions_rollback() {
            if let Some(target) = self.rollback_target() {
                event = event.with_rollback_of(target);
            }
        }
        if let Some(environment) = self.environment {
            event = event.with_label(LABEL_ENVIRONMENT, environment);
        }
        event
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    author: Option<Signature>,
    #[serde(default)]
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

impl Commit {
    fn into_event(self, repo: &str) -> Option<RawEvent> {
        let date = self.commit.author.or(self.commit.committer)?.date;
        Some(
            RawEvent::commit(self.sha, date)
                .with_label(LABEL_SERVICE, service_name(repo))
                .with_label(LABEL_REPOSITORY, repo)
                .with_label(LABEL_SOURCE, TYPE),
        )
    }
}
