//! End-to-end tests of the assembled engine with static sources
//!
//! **Coverage:**
//! - A failing source only fails the indicators that depend on it
//! - Statuses are written to the store and back onto the definition
//! - Prometheus exposition reflects successful and failed indicators
//! - The running engine schedules, serves `/healthz`, and drops entries of
//!   deleted definitions
//! - Invalid definitions are reported without being scheduled

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dora_common::MockClock;
use dora_core::StatusStore;
use dora_domain::{
    EngineConfig, EntryKey, ErrorCategory, Health, Indicator, IndicatorSpec, MetricDefinition, SinkSpec, SourceSpec,
};
use dora_infra::{Engine, InMemoryDefinitionSource, StaticCredentialResolver};
use serde_json::json;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.exposition.enabled = false;
    config.scheduler.tick_interval = Duration::from_millis(20);
    config.scheduler.run_timeout = Duration::from_secs(5);
    config.scheduler.shutdown_grace = Duration::from_secs(1);
    config.controller.resync_interval = Duration::from_millis(100);
    config
}

fn clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()))
}

/// Version control source rejecting its credential
fn vcs_source() -> SourceSpec {
    let mut spec = SourceSpec::new("static");
    spec.name = Some("vcs".into());
    spec.scope.insert("events".into(), json!([]));
    spec.scope.insert("provides".into(), json!(["commit", "deployment"]));
    spec.scope.insert("fail_with".into(), json!("auth"));
    spec
}

fn incident_source() -> SourceSpec {
    let mut spec = SourceSpec::new("static");
    spec.name = Some("incidents".into());
    spec.scope.insert(
        "events".into(),
        json!([
            {
                "kind": "incident",
                "id": "P1",
                "timestamp": "2024-01-10T10:00:00Z",
                "resolved_at": "2024-01-10T10:20:00Z",
                "labels": {"service": "payments"}
            },
            {
                "kind": "incident",
                "id": "P2",
                "timestamp": "2024-01-20T10:00:00Z",
                "resolved_at": "2024-01-20T10:40:00Z",
                "labels": {"service": "payments"}
            }
        ]),
    );
    spec
}

fn definition() -> MetricDefinition {
    MetricDefinition {
        name: "payments".into(),
        labels: BTreeMap::from([("team".to_string(), "checkout".to_string())]),
        indicators: vec![
            IndicatorSpec::new(Indicator::DeploymentFrequency, "1h"),
            IndicatorSpec::new(Indicator::LeadTime, "1h"),
            IndicatorSpec::new(Indicator::Mttr, "1h"),
        ],
        sources: vec![vcs_source(), incident_source()],
        sinks: vec![SinkSpec::new("prometheus", None)],
        status: None,
    }
}

async fn engine(config: EngineConfig, definitions: Arc<InMemoryDefinitionSource>) -> Engine {
    Engine::builder(config)
        .definitions(definitions)
        .clock(clock())
        .credentials(Arc::new(StaticCredentialResolver::new()))
        .build()
        .await
        .unwrap()
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn auth_failure_only_fails_dependent_indicators() {
    let definitions = Arc::new(InMemoryDefinitionSource::new());
    definitions.apply(definition());
    let engine = engine(config(), Arc::clone(&definitions)).await;

    let (report, results) = engine.collect_once(true).await.unwrap();
    assert_eq!(report.valid, 1);
    assert_eq!(results.len(), 3);

    let by_indicator = |indicator| results.iter().find(|r| r.indicator == indicator).unwrap();
    for indicator in [Indicator::DeploymentFrequency, Indicator::LeadTime] {
        let error = by_indicator(indicator).error().expect("vcs-backed indicator fails");
        assert_eq!(error.category, ErrorCategory::Auth);
    }
    let mttr = by_indicator(Indicator::Mttr);
    assert!(mttr.is_success());
    assert_eq!(mttr.value().unwrap().value, 30.0);
    assert_eq!(mttr.value().unwrap().sample_count, 2);

    let record = engine.status().get(&EntryKey::new("payments", Indicator::LeadTime)).await.unwrap().unwrap();
    assert_eq!(record.consecutive_failures, 1);
    assert_eq!(record.last_error.unwrap().category, ErrorCategory::Auth);

    let status = definitions.get("payments").unwrap().status.expect("status written back");
    assert!(status.valid);
    let health = |indicator| status.indicators.iter().find(|s| s.indicator == indicator).unwrap().health;
    assert_eq!(health(Indicator::DeploymentFrequency), Health::Failing);
    assert_eq!(health(Indicator::Mttr), Health::Healthy);

    let text = engine.exporter().render().unwrap();
    assert!(text.contains(r#"dora_indicator_value{definition="payments",indicator="mttr",unit="minutes"} 30"#));
    assert!(text.contains(r#"dora_collection_success{definition="payments",indicator="lead-time"} 0"#));
    assert!(text.contains(r#"dora_collection_success{definition="payments",indicator="mttr"} 1"#));
}

#[tokio::test]
async fn collect_without_export_leaves_sinks_untouched() {
    let definitions = Arc::new(InMemoryDefinitionSource::new());
    definitions.apply(definition());
    let engine = engine(config(), definitions).await;

    let (_, results) = engine.collect_once(false).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(!engine.exporter().render().unwrap().contains("dora_indicator_value{"));
    assert_eq!(engine.status().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn invalid_definitions_are_reported_and_not_scheduled() {
    let definitions = Arc::new(InMemoryDefinitionSource::new());
    let mut broken = definition();
    broken.name = "broken".into();
    broken.sources = vec![incident_source()];
    definitions.apply(broken);
    definitions.apply(definition());
    let engine = engine(config(), Arc::clone(&definitions)).await;

    let checks = engine.check_definitions().await.unwrap();
    let broken_check = checks.iter().find(|c| c.subject == "broken").unwrap();
    assert!(broken_check.error.as_deref().unwrap().contains("requires deployment events"));
    assert!(checks.iter().find(|c| c.subject == "payments").unwrap().is_valid());

    let report = engine.reconciler().reconcile_once().await.unwrap();
    assert_eq!((report.valid, report.invalid), (1, 1));
    assert!(engine.registry().keys_for("broken").is_empty());
    assert_eq!(engine.registry().keys_for("payments").len(), 3);

    let status = definitions.get("broken").unwrap().status.unwrap();
    assert!(!status.valid);
    assert!(status.validation_error.is_some());
}

#[tokio::test]
async fn running_engine_collects_serves_and_follows_deletions() {
    let definitions = Arc::new(InMemoryDefinitionSource::new());
    definitions.apply(definition());

    let mut config = config();
    config.exposition.enabled = true;
    config.exposition.listen_addr = "127.0.0.1:0".into();
    let mut engine = engine(config, Arc::clone(&definitions)).await;
    engine.start().await.unwrap();

    let status = Arc::clone(engine.status());
    eventually("all indicators to run", || status.len() == 3).await;

    let addr = engine.exposition_addr().expect("exposition enabled");
    let health: serde_json::Value =
        reqwest::get(format!("http://{addr}/healthz")).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let metrics = reqwest::get(format!("http://{addr}/metrics")).await.unwrap().text().await.unwrap();
    assert!(metrics.contains("dora_collection_success"));

    definitions.delete("payments");
    let registry = Arc::clone(engine.registry());
    eventually("entries of the deleted definition to go", || registry.is_empty()).await;
    eventually("statuses of the deleted definition to go", || status.is_empty()).await;

    engine.shutdown().await.unwrap();
    assert!(!engine.scheduler().is_running());
}
