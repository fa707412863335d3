//! Integration tests for the GitHub and PagerDuty adapters against WireMock
//!
//! **Coverage:**
//! - GitHub: deployments with their latest status, commits, rollback markers
//! - GitHub: 401 and 429 responses mapped onto the adapter error taxonomy
//! - PagerDuty: offset paging until `more` is false, token header
//! - PagerDuty: missing credential fails before any request

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dora_core::SourceAdapter;
use dora_domain::{AdapterError, EventKind, LabelFilter, Outcome, RawEvent, SourceSpec, TimeRange};
use dora_infra::adapters::{GithubAdapter, PagerDutyAdapter, StaticCredentialResolver};
use dora_infra::HttpClient;
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> TimeRange {
    TimeRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

fn http() -> HttpClient {
    HttpClient::builder().max_attempts(1).timeout(Duration::from_secs(5)).build().unwrap()
}

fn resolver() -> Arc<StaticCredentialResolver> {
    Arc::new(StaticCredentialResolver::new().with("env:TOKEN", "s3cret"))
}

async fn fetch_all(adapter: &dyn SourceAdapter) -> Result<Vec<RawEvent>, AdapterError> {
    adapter.fetch(window(), LabelFilter::new()).try_collect().await
}

fn github_spec(server: &MockServer) -> SourceSpec {
    let mut spec = SourceSpec::new("github");
    spec.endpoint = Some(server.uri());
    spec.credential = Some("env:TOKEN".into());
    spec.scope.insert("repositories".into(), json!(["acme/payments"]));
    spec
}

// ============================================================================
// GitHub
// ============================================================================

#[tokio::test]
async fn github_fetches_deployments_with_status_and_commits() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/payments/deployments"))
        .and(query_param("page", "1"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 12, "task": "deploy", "environment": "production", "created_at": "2024-01-20T12:00:00Z"},
            {
                "id": 11,
                "task": "deploy:rollback",
                "environment": "production",
                "created_at": "2024-01-15T12:00:00Z",
                "payload": {"rollback_of": 10}
            },
            {"id": 9, "task": "deploy", "environment": "production", "created_at": "2023-12-20T12:00:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/payments/deployments/12/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"state": "success"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/payments/deployments/11/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"state": "failure"}])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/payments/commits"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"sha": "abc123", "commit": {"author": {"date": "2024-01-19T08:00:00Z"}}},
            {"sha": "def456", "commit": {"committer": {"date": "2024-01-14T08:00:00Z"}}}
        ])))
        .mount(&server)
        .await;

    let adapter = GithubAdapter::from_spec(&github_spec(&server), http(), resolver()).unwrap();
    let events = fetch_all(&adapter).await.unwrap();

    let deployments: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Deployment).collect();
    assert_eq!(deployments.len(), 2, "deployment before the window is dropped");
    assert_eq!(deployments[0].id, "12");
    assert_eq!(deployments[0].outcome, Outcome::Success);
    assert_eq!(deployments[1].outcome, Outcome::Failure);
    assert_eq!(deployments[1].rollback_of.as_deref(), Some("10"));
    assert_eq!(deployments[0].service(), "payments");

    let commits: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Commit).map(|e| e.id.as_str()).collect();
    assert_eq!(commits, vec!["abc123", "def456"]);
}

#[tokio::test]
async fn github_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})))
        .mount(&server)
        .await;

    let adapter = GithubAdapter::from_spec(&github_spec(&server), http(), resolver()).unwrap();
    let err = fetch_all(&adapter).await.unwrap_err();
    assert!(matches!(err, AdapterError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn github_throttling_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "42"))
        .mount(&server)
        .await;

    let adapter = GithubAdapter::from_spec(&github_spec(&server), http(), resolver()).unwrap();
    match fetch_all(&adapter).await.unwrap_err() {
        AdapterError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Some(Duration::from_secs(42))),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn github_unknown_credential_fails_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let mut spec = github_spec(&server);
    spec.credential = Some("env:MISSING".into());
    let adapter = GithubAdapter::from_spec(&spec, http(), resolver()).unwrap();
    assert!(matches!(fetch_all(&adapter).await.unwrap_err(), AdapterError::Auth(_)));
}

// ============================================================================
// PagerDuty
// ============================================================================

fn pagerduty_spec(server: &MockServer) -> SourceSpec {
    let mut spec = SourceSpec::new("pagerduty");
    spec.endpoint = Some(server.uri());
    spec.credential = Some("env:TOKEN".into());
    spec.scope.insert("limit".into(), json!(2));
    spec.scope.insert("service_map".into(), json!({"PSVC": "payments"}));
    spec
}

#[tokio::test]
async fn pagerduty_pages_by_offset() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/incidents"))
        .and(query_param("offset", "0"))
        .and(header("authorization", "Token token=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "incidents": [
                {
                    "id": "P1",
                    "status": "resolved",
                    "created_at": "2024-01-10T10:00:00Z",
                    "resolved_at": "2024-01-10T10:30:00Z",
                    "service": {"id": "PSVC", "summary": "Payments API"}
                },
                {"id": "P2", "status": "triggered", "created_at": "2024-01-11T10:00:00Z"}
            ],
            "more": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/incidents"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "incidents": [
                {
                    "id": "P3",
                    "status": "resolved",
                    "created_at": "2024-01-12T10:00:00Z",
                    "last_status_change_at": "2024-01-12T11:00:00Z"
                }
            ],
            "more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = PagerDutyAdapter::from_spec(&pagerduty_spec(&server), http(), resolver()).unwrap();
    let events = fetch_all(&adapter).await.unwrap();

    let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["P1", "P2", "P3"]);
    assert!(events.iter().all(|e| e.kind == EventKind::Incident));
    assert_eq!(events[0].service(), "payments");
    assert!(events[1].resolved_at.is_none());
    assert_eq!(events[2].resolved_at, Some(Utc.with_ymd_and_hms(2024, 1, 12, 11, 0, 0).unwrap()));
}

#[tokio::test]
async fn pagerduty_without_credential_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let mut spec = pagerduty_spec(&server);
    spec.credential = None;
    let adapter = PagerDutyAdapter::from_spec(&spec, http(), resolver()).unwrap();
    assert!(matches!(fetch_all(&adapter).await.unwrap_err(), AdapterError::Auth(_)));
}

#[tokio::test]
async fn pagerduty_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

    let adapter = PagerDutyAdapter::from_spec(&pagerduty_spec(&server), http(), resolver()).unwrap();
    assert!(matches!(fetch_all(&adapter).await.unwrap_err(), AdapterError::TransientNetwork(_)));
}
