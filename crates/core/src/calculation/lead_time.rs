//! Lead time for changes: commit to production, in hours

use std::collections::{HashMap, VecDeque};

use dora_domain::{CalculationError, EventKind, MetricValue, Outcome, RawEvent, Unit};
use tracing::{debug, info};

use super::{deployments_in_window, grouped, ordered, stats, CalculationOptions};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// A deployment and the commit it shipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair<'a> {
    pub commit: &'a RawEvent,
    pub deployment: &'a RawEvent,
}

impl Pair<'_> {
    pub fn hours(&self) -> f64 {
        (self.deployment.timestamp - self.commit.timestamp).num_milliseconds() as f64 / MILLIS_PER_HOUR
    }
}

/// Match deployments to commits, first in first out per service
///
/// Each deployment takes the earliest unmatched commit of its service that
/// is not later than the deployment. A commit is matched at most once.
/// Returns the pairs and the deployments left without a commit.
pub fn match_pairs<'a>(
    deployments: &[&'a RawEvent],
    commits: &[&'a RawEvent],
) -> (Vec<Pair<'a>>, Vec<&'a RawEvent>) {
    let mut queues: HashMap<&'a str, VecDeque<&'a RawEvent>> = HashMap::new();
    for &commit in commits {
        queues.entry(commit.service()).or_default().push_back(commit);
    }

    let mut pairs = Vec::new();
    let mut unmatched = Vec::new();
    for &deployment in deployments {
        let matched = queues.get_mut(deployment.service()).and_then(|queue| {
            let eligible = queue.front().is_some_and(|c| c.timestamp <= deployment.timestamp);
            if eligible {
                queue.pop_front()
            } else {
                None
            }
        });
        match matched {
            Some(commit) => pairs.push(Pair { commit, deployment }),
            None => unmatched.push(deployment),
        }
    }
    (pairs, unmatched)
}

pub fn calculate(events: &[RawEvent], options: &CalculationOptions) -> Result<MetricValue, CalculationError> {
    let deployments: Vec<&RawEvent> = deployments_in_window(events, options)
        .into_iter()
        .filter(|d| d.outcome == Outcome::Success && !d.is_rollback())
        .collect();
    let commits = ordered(events, EventKind::Commit);

    let (pairs, unmatched) = match_pairs(&deployments, &commits);
    for deployment in &unmatched {
        let excluded = CalculationError::UnmatchedEvent {
            kind: EventKind::Deployment,
            id: deployment.id.clone(),
        };
        debug!(service = deployment.service(), "{excluded}");
    }
    if !unmatched.is_empty() {
        info!(
            unmatched = unmatched.len(),
            matched = pairs.len(),
            "deployments without an eligible commit excluded from lead time"
        );
    }

    let hours: Vec<f64> = pairs.iter().map(Pair::hours).collect();
    let Some(summary) = stats::summarize(&hours) else {
        return Err(CalculationError::insufficient("matched commit/deployment pairs", 1, 0));
    };

    Ok(MetricValue {
        value: summary.median,
        unit: Unit::Hours,
        sample_count: pairs.len(),
        summary: Some(summary),
        groups: grouped(pairs.iter().map(|p| (p.deployment, p.hours())), stats::median),
        excluded: unmatched.len(),
        trend: None,
        periods: Vec::new(),
        recent_failures: Vec::new(),
    })
}
