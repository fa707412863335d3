//! Integration tests for run execution inside the collection scheduler
//!
//! **Coverage:**
//! - A run exceeding `run_timeout` is recorded as a transient network error
//!   and moves the entry into backoff
//! - No more than `worker_slots` runs execute at once
//! - Stopping the scheduler cancels running collections, keeps their due
//!   time and releases the entries for the next claim

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dora_common::{Jitter, MockClock, Schedule};
use dora_core::{
    BoundSource, CollectionPlan, EventStream, RetryPolicy, ScheduleRegistry, SourceAdapter, StatusStore,
};
use dora_domain::{
    EntryKey, ErrorCategory, EventKind, ExecutionState, ExportConfig, Indicator, IndicatorSpec, LabelFilter,
    SchedulerConfig, TimeRange,
};
use dora_infra::{CollectionScheduler, DeadLetterLog, ExportDispatcher, InMemoryStatusStore};
use futures::StreamExt;

/// Adapter whose event stream never yields; counts how often it was opened
#[derive(Default)]
struct StalledAdapter {
    fetches: AtomicUsize,
}

impl SourceAdapter for StalledAdapter {
    fn provides(&self) -> &[EventKind] {
        &[EventKind::Incident]
    }

    fn fetch(&self, _window: TimeRange, _filter: LabelFilter) -> EventStream {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        futures::stream::pending().boxed()
    }
}

struct Harness {
    scheduler: CollectionScheduler,
    registry: Arc<ScheduleRegistry>,
    status: Arc<InMemoryStatusStore>,
    adapter: Arc<StalledAdapter>,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
}

fn scheduler_config(worker_slots: usize, run_timeout: Duration) -> SchedulerConfig {
    SchedulerConfig {
        worker_slots,
        tick_interval: Duration::from_millis(20),
        run_timeout,
        retry_ceiling: 3,
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(300),
        jitter: Jitter::None,
        shutdown_grace: Duration::from_secs(2),
    }
}

/// Build a scheduler with one stalled entry per definition name, all due at
/// the mock clock's start time
fn harness(config: &SchedulerConfig, definitions: &[&str]) -> Harness {
    let clock = Arc::new(MockClock::new(start_time()));
    let registry = Arc::new(ScheduleRegistry::new(RetryPolicy::from_config(config)));
    let status = Arc::new(InMemoryStatusStore::new());
    let dispatcher = Arc::new(ExportDispatcher::new(&ExportConfig::default(), Arc::new(DeadLetterLog::new(10, None))));
    let adapter = Arc::new(StalledAdapter::default());

    for name in definitions {
        let spec = IndicatorSpec::new(Indicator::Mttr, "@daily");
        let source = BoundSource::new("stalled", adapter.clone(), LabelFilter::new());
        let plan = CollectionPlan::new(*name, spec, [source]);
        registry.upsert(
            plan.key(),
            Schedule::parse("@daily").unwrap(),
            Arc::new(plan),
            format!("{name}-v1"),
            start_time(),
        );
    }

    let scheduler = CollectionScheduler::new(config, registry.clone(), status.clone(), dispatcher, clock);
    Harness { scheduler, registry, status, adapter }
}

fn key(definition: &str) -> EntryKey {
    EntryKey::new(definition, Indicator::Mttr)
}

fn running(registry: &ScheduleRegistry, definitions: &[&str]) -> usize {
    definitions
        .iter()
        .filter(|name| registry.info(&key(name)).is_some_and(|info| info.state == ExecutionState::Running))
        .count()
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
async fn run_timeout_is_a_transient_failure_that_backs_off() {
    let config = scheduler_config(2, Duration::from_millis(50));
    let Harness { mut scheduler, registry, status, adapter } = harness(&config, &["search"]);
    scheduler.start().await.unwrap();

    let search = key("search");
    eventually("timed-out run to back off", || {
        registry.info(&search).is_some_and(|info| info.state == ExecutionState::Backoff)
    })
    .await;

    let info = registry.info(&search).unwrap();
    assert_eq!(info.attempt, 1);
    assert_eq!(info.next_due, Some(start_time() + chrono::Duration::seconds(30)));
    assert_eq!(adapter.fetches.load(Ordering::SeqCst), 1);

    let record = status.get(&search).await.unwrap().expect("timeout recorded");
    let error = record.last_error.expect("last error set");
    assert_eq!(error.category, ErrorCategory::TransientNetwork);
    assert_eq!(record.consecutive_failures, 1);
    assert!(record.last_success_at.is_none());

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_runs_never_exceed_worker_slots() {
    let definitions = ["alpha", "beta", "gamma"];
    let config = scheduler_config(1, Duration::from_secs(60));
    let Harness { mut scheduler, registry, adapter, .. } = harness(&config, &definitions);
    scheduler.start().await.unwrap();

    eventually("first run to start", || adapter.fetches.load(Ordering::SeqCst) == 1).await;

    // let the loop tick several times while the only slot is held
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.wake();
        assert_eq!(running(&registry, &definitions), 1);
        assert!(scheduler.in_flight() <= 1);
    }
    assert_eq!(adapter.fetches.load(Ordering::SeqCst), 1);

    let waiting = definitions
        .iter()
        .filter(|name| registry.info(&key(name)).is_some_and(|info| info.state == ExecutionState::Idle))
        .count();
    assert_eq!(waiting, 2);

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn stop_cancels_runs_and_keeps_them_due() {
    let config = scheduler_config(2, Duration::from_secs(60));
    let Harness { mut scheduler, registry, status, adapter } = harness(&config, &["search"]);
    scheduler.start().await.unwrap();

    let search = key("search");
    eventually("run to start", || {
        registry.info(&search).is_some_and(|info| info.state == ExecutionState::Running)
            && adapter.fetches.load(Ordering::SeqCst) == 1
    })
    .await;

    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.in_flight(), 0);

    let info = registry.info(&search).unwrap();
    assert_eq!(info.state, ExecutionState::Idle);
    assert_eq!(info.next_due, Some(start_time()));
    assert_eq!(info.attempt, 0);
    assert!(status.get(&search).await.unwrap().is_none(), "cancelled runs leave no status");

    let claims = registry.claim_due(start_time(), 4);
    assert_eq!(claims.len(), 1, "in-flight flag released on cancellation");
    assert_eq!(claims[0].key, search);
}
