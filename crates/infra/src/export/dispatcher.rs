//! Fan-out of terminal results to each definition's sinks
//!
//! Pull sinks are updated once. Push sinks are retried with exponential
//! backoff up to the configured attempt budget, each attempt bounded by
//! the push timeout; results that still fail are dead-lettered. A slow or
//! failing sink never delays the other sinks or the scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dora_common::{ErrorClassification, ExponentialBackoff};
use dora_core::{Sink, SinkMode};
use dora_domain::{EntryKey, ExportConfig, MetricResult, SinkError};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use super::dead_letter::{DeadLetter, DeadLetterLog};

#[derive(Clone)]
struct Registration {
    sinks: Vec<Arc<dyn Sink>>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct PushPolicy {
    attempts: u32,
    timeout: Duration,
    backoff: ExponentialBackoff,
}

/// Delivers results to sinks off the scheduler's path
pub struct ExportDispatcher {
    registrations: RwLock<BTreeMap<String, Registration>>,
    policy: PushPolicy,
    dead_letters: Arc<DeadLetterLog>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ExportDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDispatcher")
            .field("definitions", &self.registrations.read().len())
            .field("policy", &self.policy)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl ExportDispatcher {
    pub fn new(config: &ExportConfig, dead_letters: Arc<DeadLetterLog>) -> Self {
        Self {
            registrations: RwLock::new(BTreeMap::new()),
            policy: PushPolicy {
                attempts: config.push_attempts.max(1),
                timeout: config.push_timeout,
                backoff: ExponentialBackoff::new(config.push_base_delay, config.push_max_delay),
            },
            dead_letters,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterLog> {
        &self.dead_letters
    }

    /// Install or replace the sinks of a definition
    pub fn register(&self, definition: &str, sinks: Vec<Arc<dyn Sink>>, labels: BTreeMap<String, String>) {
        debug!(definition, sinks = sinks.len(), "registering export sinks");
        self.registrations.write().insert(definition.to_string(), Registration { sinks, labels });
    }

    pub fn is_registered(&self, definition: &str) -> bool {
        self.registrations.read().contains_key(definition)
    }

    /// Definitions with registered sinks
    pub fn definitions(&self) -> Vec<String> {
        self.registrations.read().keys().cloned().collect()
    }

    /// Retract `keys` from the definition's current sinks
    pub async fn retract(&self, definition: &str, keys: &[EntryKey]) {
        let sinks = match self.registrations.read().get(definition) {
            Some(registration) => registration.sinks.clone(),
            None => return,
        };
        retract_all(&sinks, keys).await;
    }

    /// Drop a definition's sinks after retracting `keys` from them
    pub async fn unregister(&self, definition: &str, keys: &[EntryKey]) {
        let Some(registration) = self.registrations.write().remove(definition) else {
            return;
        };
        retract_all(&registration.sinks, keys).await;
        debug!(definition, "unregistered export sinks");
    }

    /// Hand a result to the sinks in the background
    pub fn dispatch(&self, result: MetricResult) {
        let Some(registration) = self.registrations.read().get(&result.definition).cloned() else {
            debug!(definition = %result.definition, "no sinks registered; result not exported");
            return;
        };
        let policy = self.policy.clone();
        let dead_letters = Arc::clone(&self.dead_letters);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            deliver_all(&registration, &result, &policy, &dead_letters, &cancel).await;
        });
    }

    /// Deliver a result and wait for every sink to finish
    pub async fn deliver(&self, result: &MetricResult) {
        let Some(registration) = self.registrations.read().get(&result.definition).cloned() else {
            return;
        };
        deliver_all(&registration, result, &self.policy, &self.dead_letters, &self.cancel).await;
    }

    /// Dispatches still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `grace` for in-flight deliveries, then abandon the rest
    ///
    /// Returns whether every delivery finished in time.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(in_flight = self.tracker.len(), "export deliveries did not finish within the grace period");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        drained
    }
}

async fn retract_all(sinks: &[Arc<dyn Sink>], keys: &[EntryKey]) {
    for sink in sinks {
        for key in keys {
            if let Err(e) = sink.retract(key).await {
                warn!(sink = sink.name(), key = %key, error = %e, "failed to retract exported series");
            }
        }
    }
}

async fn deliver_all(
    registration: &Registration,
    result: &MetricResult,
    policy: &PushPolicy,
    dead_letters: &DeadLetterLog,
    cancel: &CancellationToken,
) {
    let deliveries = registration.sinks.iter().map(|sink| async move {
        match sink.mode() {
            SinkMode::Pull => {
                if let Err(e) = sink.deliver(result, &registration.labels).await {
                    warn!(sink = sink.name(), error = %e, "pull sink rejected result");
                }
            }
            SinkMode::Push => push(sink.as_ref(), result, &registration.labels, policy, dead_letters, cancel).await,
        }
    });
    futures::future::join_all(deliveries).await;
}

async fn push(
    sink: &dyn Sink,
    result: &MetricResult,
    labels: &BTreeMap<String, String>,
    policy: &PushPolicy,
    dead_letters: &DeadLetterLog,
    cancel: &CancellationToken,
) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match tokio::time::timeout(policy.timeout, sink.deliver(result, labels)).await {
            Ok(Ok(())) => {
                debug!(sink = sink.name(), definition = %result.definition, indicator = %result.indicator, attempt, "result delivered");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => SinkError::Timeout { sink: sink.name().to_string(), timeout: policy.timeout },
        };

        if !error.is_retryable() || attempt >= policy.attempts {
            dead_letters.record(DeadLetter::new(sink.name(), result, attempt, error.to_string())).await;
            return;
        }

        let delay = policy.backoff.delay(attempt);
        warn!(sink = sink.name(), attempt, ?delay, error = %error, "push delivery failed; retrying");
        tokio::select! {
            () = cancel.cancelled() => {
                let message = format!("abandoned at shutdown after: {error}");
                dead_letters.record(DeadLetter::new(sink.name(), result, attempt, message)).await;
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
