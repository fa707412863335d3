use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dora_common::Clock;
use dora_core::{ScheduleRegistry, StatusStore, TriggerOutcome};
use dora_domain::{DoraError, EntryKey, Indicator, Result, ScheduleEntryInfo, StatusRecord};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::export::prometheus::CONTENT_TYPE;
use crate::export::{DeadLetter, DeadLetterLog, PrometheusExporter};

/// Shared state behind the exposition routes
#[derive(Clone)]
pub struct ExpositionState {
    pub exporter: Arc<PrometheusExporter>,
    pub registry: Arc<ScheduleRegistry>,
    pub status: Arc<dyn StatusStore>,
    pub dead_letters: Arc<DeadLetterLog>,
    pub clock: Arc<dyn Clock>,
    /// Woken after a manual trigger
    pub wake: Arc<Notify>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    entries: usize,
}

#[derive(Debug, Serialize)]
struct DeadLetterSummary {
    retained: usize,
    total: u64,
    recent: Vec<DeadLetter>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    entries: Vec<ScheduleEntryInfo>,
    records: Vec<StatusRecord>,
    dead_letters: DeadLetterSummary,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    key: String,
    outcome: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

const RECENT_DEAD_LETTERS: usize = 20;

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorResponse { error: error.to_string() })).into_response()
}

async fn metrics(State(state): State<ExpositionState>) -> Response {
    match state.exporter.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn healthz(State(state): State<ExpositionState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION"), entries: state.registry.len() })
}

async fn status(State(state): State<ExpositionState>) -> Response {
    let records = match state.status.list().await {
        Ok(records) => records,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let letters = state.dead_letters.entries();
    let recent = letters.iter().rev().take(RECENT_DEAD_LETTERS).cloned().collect();
    Json(StatusResponse {
        entries: state.registry.snapshot(),
        records,
        dead_letters: DeadLetterSummary { retained: letters.len(), total: state.dead_letters.total(), recent },
    })
    .into_response()
}

async fn trigger(State(state): State<ExpositionState>, Path((definition, indicator)): Path<(String, String)>) -> Response {
    let indicator: Indicator = match indicator.parse() {
        Ok(indicator) => indicator,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let key = EntryKey::new(definition, indicator);
    let outcome = match state.registry.trigger(&key, state.clock.now()) {
        TriggerOutcome::Scheduled => {
            state.wake.notify_one();
            "scheduled"
        }
        TriggerOutcome::Deferred => "deferred",
        TriggerOutcome::NotFound => return error_response(StatusCode::NOT_FOUND, format!("no schedule entry {key}")),
    };
    info!(key = %key, outcome, "manual trigger accepted");
    (StatusCode::ACCEPTED, Json(TriggerResponse { key: key.to_string(), outcome })).into_response()
}

/// Routes served by the exposition endpoint
pub fn router(state: ExpositionState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/trigger/{definition}/{indicator}", post(trigger))
        .with_state(state)
}

/// Exposition HTTP server running in the background
#[derive(Debug)]
pub struct ExpositionServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpositionServer {
    /// Bind `addr` and start serving
    pub async fn start(addr: &str, state: ExpositionState) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DoraError::Config(format!("failed to bind exposition endpoint {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DoraError::Internal(format!("failed to determine exposition address: {e}")))?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = router(state);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await {
                error!(error = %e, "exposition server error");
            }
        });

        info!(%local_addr, "exposition endpoint listening");
        Ok(Self { local_addr, cancel, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the server task
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "exposition server task failed");
        }
        info!("exposition endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use dora_common::MockClock;
    use dora_core::RetryPolicy;
    use tower::ServiceExt;

    use super::*;
    use crate::status::InMemoryStatusStore;

    fn state() -> ExpositionState {
        ExpositionState {
            exporter: Arc::new(PrometheusExporter::new().unwrap()),
            registry: Arc::new(ScheduleRegistry::new(RetryPolicy::default())),
            status: Arc::new(InMemoryStatusStore::new()),
            dead_letters: Arc::new(DeadLetterLog::new(4, None)),
            clock: Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            wake: Arc::new(Notify::new()),
        }
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = router(state())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains(r#""status":"ok""#));
    }

    #[tokio::test]
    async fn metrics_use_text_exposition_content_type() {
        let response = router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    }

    #[tokio::test]
    async fn status_lists_entries_records_and_dead_letters() {
        let response = router(state())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(json["entries"], serde_json::json!([]));
        assert_eq!(json["dead_letters"]["total"], 0);
    }

    #[tokio::test]
    async fn trigger_rejects_unknown_entries() {
        let app = router(state());
        let missing = app
            .clone()
            .oneshot(Request::post("/trigger/payments/mttr").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid = app.oneshot(Request::post("/trigger/payments/velocity").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn server_binds_and_shuts_down() {
        let server = ExpositionServer::start("127.0.0.1:0", state()).await.unwrap();
        let url = format!("http://{}/healthz", server.local_addr());
        let response = reqwest::get(url).await.unwrap();
        assert!(response.status().is_success());
        server.shutdown().await;
    }
}
