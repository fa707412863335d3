//! Collection scheduler: the loop that turns due schedule entries into runs
//!
//! A single loop claims due entries from the [`ScheduleRegistry`], bounded by
//! a semaphore of `worker_slots` permits, and spawns one tracked task per
//! run. Each run is wrapped in `run_timeout`; its outcome goes back to the
//! registry, which decides the next due time. Non-cancelled results are
//! applied to the status store and terminal ones are dispatched to sinks.
//!
//! The loop sleeps until the earliest due time, capped by `tick_interval`,
//! and is woken early by completions, triggers and registry changes.

use std::sync::Arc;
use std::time::Duration;

use dora_common::{Clock, ErrorClassification, ErrorSeverity};
use dora_core::{execute, Claim, RunOutcome, ScheduleRegistry, StatusStore, TriggerOutcome};
use dora_domain::{CollectionError, EntryKey, MetricResult, SchedulerConfig};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::export::ExportDispatcher;
use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Shared state of the loop and its run tasks
struct RunContext {
    registry: Arc<ScheduleRegistry>,
    status: Arc<dyn StatusStore>,
    dispatcher: Arc<ExportDispatcher>,
    clock: Arc<dyn Clock>,
    slots: Arc<Semaphore>,
    wake: Arc<Notify>,
    status_changed: Arc<Notify>,
    tracker: TaskTracker,
    run_timeout: Duration,
    tick_interval: Duration,
}

/// Runs due collection entries on a bounded worker pool
pub struct CollectionScheduler {
    context: Arc<RunContext>,
    shutdown_grace: Duration,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl std::fmt::Debug for CollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("entries", &self.context.registry.len())
            .field("available_slots", &self.context.slots.available_permits())
            .field("in_flight", &self.context.tracker.len())
            .finish_non_exhaustive()
    }
}

impl CollectionScheduler {
    pub fn new(
        config: &SchedulerConfig,
        registry: Arc<ScheduleRegistry>,
        status: Arc<dyn StatusStore>,
        dispatcher: Arc<ExportDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = RunContext {
            registry,
            status,
            dispatcher,
            clock,
            slots: Arc::new(Semaphore::new(config.worker_slots.max(1))),
            wake: Arc::new(Notify::new()),
            status_changed: Arc::new(Notify::new()),
            tracker: TaskTracker::new(),
            run_timeout: config.run_timeout,
            tick_interval: config.tick_interval,
        };
        Self {
            context: Arc::new(context),
            shutdown_grace: config.shutdown_grace,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.context.registry
    }

    /// Notified whenever a run changes a status record
    pub fn status_changed(&self) -> Arc<Notify> {
        Arc::clone(&self.context.status_changed)
    }

    /// Re-scan the registry now, for example after entries were added
    pub fn wake(&self) {
        self.context.wake.notify_one();
    }

    /// Handle that wakes the claim loop when notified
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.context.wake)
    }

    /// Request an immediate run of one entry
    pub fn trigger(&self, key: &EntryKey) -> TriggerOutcome {
        let outcome = self.context.registry.trigger(key, self.context.clock.now());
        if outcome == TriggerOutcome::Scheduled {
            self.wake();
        }
        debug!(key = %key, ?outcome, "manual trigger");
        outcome
    }

    /// Runs currently executing
    pub fn in_flight(&self) -> usize {
        self.context.tracker.len()
    }

    /// Start the scheduler
    ///
    /// Spawns the claim loop in the background.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            worker_slots = self.context.slots.available_permits(),
            entries = self.context.registry.len(),
            "Starting collection scheduler"
        );

        // supports restart after stop
        self.cancellation_token = CancellationToken::new();
        self.context.tracker.reopen();

        let context = Arc::clone(&self.context);
        let cancel = self.cancellation_token.clone();
        let handle = tokio::spawn(async move {
            Self::claim_loop(context, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);
        info!("Collection scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully
    ///
    /// Cancels the loop and every run, then waits up to `shutdown_grace` for
    /// runs to release their entries. Cancelled runs keep their due time.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is not running, or runs outlive the grace
    /// period
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!(in_flight = self.in_flight(), "Stopping collection scheduler");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(self.shutdown_grace, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: self.shutdown_grace.as_secs() })?
                .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        self.context.tracker.close();
        if tokio::time::timeout(self.shutdown_grace, self.context.tracker.wait()).await.is_err() {
            warn!(in_flight = self.in_flight(), "collection runs did not finish within the grace period");
            return Err(SchedulerError::Timeout { seconds: self.shutdown_grace.as_secs() });
        }

        info!("Collection scheduler stopped");
        Ok(())
    }

    /// Check if scheduler is running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn claim_loop(context: Arc<RunContext>, cancel: CancellationToken) {
        loop {
            let now = context.clock.now();
            let available = context.slots.available_permits();

            for claim in context.registry.claim_due(now, available) {
                // the loop is the only acquirer, so a permit is always free here
                let Ok(permit) = Arc::clone(&context.slots).try_acquire_owned() else {
                    break;
                };
                debug!(key = %claim.key, fired_at = %claim.fired_at, "collection run claimed");
                let run_context = Arc::clone(&context);
                let run_cancel = cancel.child_token();
                context.tracker.spawn(async move {
                    Self::run(run_context, claim, run_cancel, permit).await;
                });
            }

            let delay = if context.slots.available_permits() == 0 {
                context.tick_interval
            } else {
                context
                    .registry
                    .next_wakeup()
                    .map_or(context.tick_interval, |due| {
                        (due - context.clock.now()).to_std().unwrap_or(Duration::ZERO).min(context.tick_interval)
                    })
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Collection loop cancelled");
                    break;
                }
                () = context.wake.notified() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run(context: Arc<RunContext>, claim: Claim, cancel: CancellationToken, permit: OwnedSemaphorePermit) {
        let plan = Arc::clone(&claim.plan);
        let window = plan.window_ending_at(claim.fired_at);

        let outcome = match tokio::time::timeout(context.run_timeout, execute(&plan, window, &cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CollectionError::Timeout(context.run_timeout)),
        };
        drop(permit);

        let run_outcome = RunOutcome::from_result(&outcome);
        let now = context.clock.now();
        let key = claim.key.clone();
        let Some(completion) = context.registry.complete(claim, run_outcome, now) else {
            debug!(key = %key, "entry removed during run; result discarded");
            context.wake.notify_one();
            return;
        };
        if run_outcome == RunOutcome::Cancelled {
            debug!(key = %key, "collection run cancelled");
            context.wake.notify_one();
            return;
        }

        let result = plan.result(window, now, &outcome);
        log_result(&key, &result, &outcome, completion.terminal, completion.attempt);

        match context.status.apply(&result).await {
            Ok(true) => context.status_changed.notify_one(),
            Ok(false) => debug!(key = %key, window_end = %window.end, "stale result not applied"),
            Err(e) => error!(key = %key, error = %e, "failed to record status"),
        }

        if completion.terminal {
            context.dispatcher.dispatch(result);
        }
        context.wake.notify_one();
    }
}

fn log_result<T>(
    key: &EntryKey,
    result: &MetricResult,
    outcome: &Result<T, CollectionError>,
    terminal: bool,
    attempt: u32,
) {
    match outcome {
        Ok(_) => info!(
            key = %key,
            value = result.value().map(|v| v.value),
            level = ?result.performance_level(),
            "collection run succeeded"
        ),
        Err(e) => {
            let category = e.category();
            match e.severity() {
                ErrorSeverity::Info => info!(key = %key, %category, error = %e, "indicator not computed"),
                ErrorSeverity::Warning if !terminal => {
                    warn!(key = %key, %category, attempt, error = %e, retry_after = ?e.retry_after(), "collection run failed; backing off");
                }
                ErrorSeverity::Warning => warn!(key = %key, %category, error = %e, "collection run failed"),
                _ => error!(key = %key, %category, error = %e, "collection run failed"),
            }
        }
    }
}
