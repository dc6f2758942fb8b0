//! Bounded-concurrency execution of independent async tasks.
//!
//! [`run_bounded`] drives at most `limit` tasks at once and starts the next
//! one as soon as any slot frees up (completion order, not submission
//! order, frees slots). Results are handed back in **submission order**.
//!
//! ## Failure policy
//!
//! Remote jobs cannot be abandoned safely once created, so a failure does
//! not cancel siblings that are already running: they drain to completion
//! and anything they create stays visible to the resource tracker. Tasks
//! that have not started yet when the first failure lands are skipped.
//! The caller receives the failure of the earliest-submitted failing task.

use crate::error::ParallexError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::debug;

/// Run `tasks` with at most `limit` in flight; return their outputs in
/// submission order, or the first failure.
///
/// `limit == 0` is a configuration error.
pub async fn run_bounded<T, Fut, I>(tasks: I, limit: usize) -> Result<Vec<T>, ParallexError>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, ParallexError>>,
{
    if limit == 0 {
        return Err(ParallexError::InvalidConfig(
            "Concurrency limit must be ≥ 1".into(),
        ));
    }

    let mut pending = tasks.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut outcomes: Vec<(usize, Result<T, ParallexError>)> = Vec::new();
    let mut failed = false;

    loop {
        // Futures are lazy: a task starts when it takes a slot here.
        while !failed && in_flight.len() < limit {
            let Some((idx, task)) = pending.next() else {
                break;
            };
            in_flight.push(async move { (idx, task.await) });
        }
        let Some((idx, result)) = in_flight.next().await else {
            break;
        };
        if result.is_err() && !failed {
            failed = true;
            debug!("Task {} failed; draining {} running task(s)", idx, in_flight.len());
        }
        outcomes.push((idx, result));
    }

    let skipped = pending.count();
    if skipped > 0 {
        debug!("Skipped {} task(s) after an earlier failure", skipped);
    }

    outcomes.sort_by_key(|(idx, _)| *idx);

    let mut results = Vec::with_capacity(outcomes.len());
    for (_, outcome) in outcomes {
        results.push(outcome?);
    }
    Ok(results)
}
