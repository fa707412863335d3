//! Collection run execution

use dora_domain::{CollectionError, EventKind, MetricValue, PerformanceLevel, RawEvent, TimeRange};
use futures::future::try_join_all;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{BoundSource, CollectionPlan};
use crate::calculation::{evaluate, CalculationOptions};

/// Drain every source of `plan` for `window`
///
/// Sources are read concurrently. The first adapter error ends the whole
/// fetch, so a run never computes over a partial event set.
pub async fn collect_events(
    plan: &CollectionPlan,
    window: TimeRange,
    cancel: &CancellationToken,
) -> Result<Vec<RawEvent>, CollectionError> {
    let consumed = plan.indicator().consumed_kinds();
    let batches =
        try_join_all(plan.sources.iter().map(|source| drain(source, consumed, window, cancel))).await?;
    Ok(batches.into_iter().flatten().collect())
}

/// Fetch and evaluate one indicator over `window`
#[instrument(skip_all, fields(definition = %plan.definition, indicator = %plan.indicator(), window = %window))]
pub async fn execute(
    plan: &CollectionPlan,
    window: TimeRange,
    cancel: &CancellationToken,
) -> Result<(MetricValue, PerformanceLevel), CollectionError> {
    let events = collect_events(plan, window, cancel).await?;
    let options = CalculationOptions::from_spec(&plan.spec, window);
    let evaluated = evaluate(plan.indicator(), &events, &options)?;
    debug!(
        events = events.len(),
        value = evaluated.0.value,
        level = %evaluated.1,
        "indicator evaluated"
    );
    Ok(evaluated)
}

async fn drain(
    source: &BoundSource,
    kinds: &[EventKind],
    window: TimeRange,
    cancel: &CancellationToken,
) -> Result<Vec<RawEvent>, CollectionError> {
    let mut stream = source.adapter.fetch(window, source.filter.clone());
    let mut events = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CollectionError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Ok(event)) => {
                if kinds.contains(&event.kind) && source.filter.matches(&event) {
                    events.push(event);
                }
            }
            Some(Err(error)) => return Err(CollectionError::adapter(source.name.clone(), error)),
        }
    }

    debug!(source = %source.name, events = events.len(), "source drained");
    Ok(events)
}

