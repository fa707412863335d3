//! Concurrent schedule table
//!
//! One entry per (definition, indicator). Each entry carries an in-flight
//! flag that is claimed with a compare-and-set, so at most one run of an
//! entry exists at any time no matter how many claimers or triggers race.
//!
//! State machine: `idle|backoff -> running -> idle|backoff`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use dora_common::{ErrorClassification, ExponentialBackoff, Schedule};
use dora_domain::{CollectionError, EntryKey, ExecutionState, SchedulerConfig, ScheduleEntryInfo};
use tracing::debug;

use crate::collection::CollectionPlan;

/// Retry behaviour for retryable run failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retryable failures in a row before giving up until the next fire
    pub ceiling: u32,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(ceiling: u32, backoff: ExponentialBackoff) -> Self {
        Self { ceiling, backoff }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.retry_ceiling,
            ExponentialBackoff::new(config.backoff_base, config.backoff_max).with_jitter(config.jitter),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// How a run ended, as far as scheduling is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { retryable: bool, retry_after: Option<Duration> },
    /// Cancelled by shutdown; the entry keeps its due time
    Cancelled,
}

impl RunOutcome {
    pub fn from_result<T>(result: &Result<T, CollectionError>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(CollectionError::Cancelled) => Self::Cancelled,
            Err(error) => Self::Failed { retryable: error.is_retryable(), retry_after: error.retry_after() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The entry was idle and is now due
    Scheduled,
    /// The entry is running; it runs again right after the current run
    Deferred,
    NotFound,
}

/// Entry state after a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub state: ExecutionState,
    pub next_due: Option<DateTime<Utc>>,
    pub attempt: u32,
    /// The result is final for this fire and should be exported
    pub terminal: bool,
}

/// Exclusive right to run one entry
///
/// Dropping a claim without completing it releases the in-flight flag.
#[derive(Debug)]
pub struct Claim {
    pub key: EntryKey,
    pub plan: Arc<CollectionPlan>,
    pub fired_at: DateTime<Utc>,
    guard: InFlightGuard,
}

#[derive(Debug)]
struct InFlightGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl InFlightGuard {
    fn release(mut self) {
        self.flag.store(false, Ordering::Release);
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug)]
struct Entry {
    schedule: Schedule,
    plan: Arc<CollectionPlan>,
    fingerprint: String,
    state: ExecutionState,
    next_due: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
    attempt: u32,
    rerun_requested: bool,
    in_flight: Arc<AtomicBool>,
}

impl Entry {
    fn info(&self, key: &EntryKey) -> ScheduleEntryInfo {
        ScheduleEntryInfo {
            key: key.clone(),
            schedule: self.schedule.to_string(),
            state: self.state,
            next_due: self.next_due,
            last_fired: self.last_fired,
            attempt: self.attempt,
            rerun_requested: self.rerun_requested,
        }
    }
}

fn add(at: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay).ok().and_then(|d| at.checked_add_signed(d))
}

/// Registry of schedule entries
#[derive(Debug, Default)]
pub struct ScheduleRegistry {
    entries: DashMap<EntryKey, Entry>,
    policy: RetryPolicy,
}

impl ScheduleRegistry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { entries: DashMap::new(), policy }
    }

    /// Add or update an entry
    ///
    /// New entries are due immediately. An entry whose `fingerprint` is
    /// unchanged is left alone; otherwise its plan is replaced while its
    /// execution state is kept.
    pub fn upsert(
        &self,
        key: EntryKey,
        schedule: Schedule,
        plan: Arc<CollectionPlan>,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        match self.entries.entry(key) {
            MapEntry::Vacant(vacant) => {
                debug!(entry = %vacant.key(), schedule = %schedule, "schedule entry added");
                vacant.insert(Entry {
                    schedule,
                    plan,
                    fingerprint,
                    state: ExecutionState::Idle,
                    next_due: Some(now),
                    last_fired: None,
                    attempt: 0,
                    rerun_requested: false,
                    in_flight: Arc::new(AtomicBool::new(false)),
                });
                UpsertOutcome::Added
            }
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.fingerprint == fingerprint {
                    return UpsertOutcome::Unchanged;
                }
                if entry.schedule != schedule && entry.state != ExecutionState::Backoff {
                    entry.next_due = entry.last_fired.map_or(Some(now), |last| schedule.next_after(last));
                }
                entry.schedule = schedule;
                entry.plan = plan;
                entry.fingerprint = fingerprint;
                debug!(entry = %occupied.key(), "schedule entry updated");
                UpsertOutcome::Updated
            }
        }
    }

    /// Remove an entry; a run in flight finishes but its completion is ignored
    pub fn remove(&self, key: &EntryKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry of a definition
    pub fn remove_definition(&self, definition: &str) -> Vec<EntryKey> {
        let keys = self.keys_for(definition);
        keys.into_iter().filter(|key| self.remove(key)).collect()
    }

    pub fn keys_for(&self, definition: &str) -> Vec<EntryKey> {
        let mut keys: Vec<EntryKey> = self
            .entries
            .iter()
            .filter(|e| e.key().definition == definition)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Claim up to `limit` due entries, oldest due time first
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<Claim> {
        if limit == 0 {
            return Vec::new();
        }

        let mut due: Vec<(DateTime<Utc>, EntryKey)> = self
            .entries
            .iter()
            .filter(|e| !e.in_flight.load(Ordering::Acquire))
            .filter_map(|e| e.next_due.filter(|at| *at <= now).map(|at| (at, e.key().clone())))
            .collect();
        due.sort();

        let mut claims = Vec::new();
        for (_, key) in due {
            if claims.len() >= limit {
                break;
            }
            let Some(mut entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if !entry.next_due.is_some_and(|at| at <= now) {
                continue;
            }
            if entry.in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
                continue;
            }
            entry.state = ExecutionState::Running;
            entry.last_fired = Some(now);
            entry.rerun_requested = false;
            claims.push(Claim {
                plan: Arc::clone(&entry.plan),
                fired_at: now,
                guard: InFlightGuard { flag: Arc::clone(&entry.in_flight), armed: true },
                key,
            });
        }
        claims
    }

    /// Record how a claimed run ended and compute the next due time
    ///
    /// Returns `None` when the entry was removed (or replaced) while the run
    /// was in flight; such results must be discarded.
    pub fn complete(&self, claim: Claim, outcome: RunOutcome, now: DateTime<Utc>) -> Option<Completion> {
        let Claim { key, guard, .. } = claim;
        let mut entry = match self.entries.get_mut(&key) {
            Some(entry) if Arc::ptr_eq(&entry.in_flight, &guard.flag) => entry,
            _ => return None,
        };

        let mut terminal = true;
        match outcome {
            RunOutcome::Succeeded | RunOutcome::Failed { retryable: false, .. } => {
                entry.attempt = 0;
                entry.state = ExecutionState::Idle;
                entry.next_due = entry.schedule.next_after(now);
            }
            RunOutcome::Failed { retryable: true, retry_after } => {
                entry.attempt += 1;
                if entry.attempt < self.policy.ceiling {
                    let delay = self.policy.backoff.delay(entry.attempt).max(retry_after.unwrap_or_default());
                    entry.state = ExecutionState::Backoff;
                    entry.next_due = add(now, delay);
                    terminal = false;
                } else {
                    entry.attempt = 0;
                    entry.state = ExecutionState::Idle;
                    entry.next_due = entry.schedule.next_after(now);
                }
            }
            RunOutcome::Cancelled => {
                entry.state = ExecutionState::Idle;
                terminal = false;
            }
        }

        if entry.rerun_requested && outcome != RunOutcome::Cancelled {
            entry.rerun_requested = false;
            entry.next_due = Some(now);
        }

        // released under the entry lock so a concurrent trigger sees either
        // the running entry or the completed one
        guard.release();

        Some(Completion { state: entry.state, next_due: entry.next_due, attempt: entry.attempt, terminal })
    }

    /// Request an immediate run
    pub fn trigger(&self, key: &EntryKey, now: DateTime<Utc>) -> TriggerOutcome {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return TriggerOutcome::NotFound;
        };
        if entry.in_flight.load(Ordering::Acquire) {
            entry.rerun_requested = true;
            TriggerOutcome::Deferred
        } else {
            entry.next_due = Some(now);
            TriggerOutcome::Scheduled
        }
    }

    /// Earliest due time among entries that are not running
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|e| !e.in_flight.load(Ordering::Acquire))
            .filter_map(|e| e.next_due)
            .min()
    }

    pub fn schedule(&self, key: &EntryKey) -> Option<Schedule> {
        self.entries.get(key).map(|e| e.schedule.clone())
    }

    pub fn info(&self, key: &EntryKey) -> Option<ScheduleEntryInfo> {
        self.entries.get(key).map(|e| e.info(key))
    }

    /// All entries, ordered by key
    pub fn snapshot(&self) -> Vec<ScheduleEntryInfo> {
        let mut infos: Vec<ScheduleEntryInfo> = self.entries.iter().map(|e| e.info(e.key())).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Plans of every entry, ordered by key
    pub fn plans(&self) -> Vec<Arc<CollectionPlan>> {
        let mut plans: Vec<(EntryKey, Arc<CollectionPlan>)> =
            self.entries.iter().map(|e| (e.key().clone(), Arc::clone(&e.plan))).collect();
        plans.sort_by(|a, b| a.0.cmp(&b.0));
        plans.into_iter().map(|(_, plan)| plan).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
