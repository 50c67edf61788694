//! Bounded fan-out of lookups over a fixed number of worker slots.
//!
//! Every identifier in a batch gets its own task, but a task only calls the
//! provider while it holds one of `slots` semaphore permits. Tasks waiting for a
//! permit hold nothing, and the semaphore hands permits out in request order,
//! so admission roughly follows submission order while completion order is
//! unconstrained.
//!
//! The whole batch runs under one deadline. When it expires, every task that
//! has not produced an outcome yet (whether it is talking to the provider or
//! still queued for a slot) is aborted and reported as a timeout, so the caller
//! always gets an answer before the platform limit.

use crate::aggregator::Aggregator;
use crate::errors::{DoiRouterError, Result};
use crate::lookup::Lookup;
use crate::metrics_defs::{
    BATCH_DEADLINE_EXCEEDED, BATCH_DURATION, BATCH_SIZE, LOOKUP_DURATION, LOOKUP_OUTCOME,
    LOOKUPS_INFLIGHT,
};
use crate::types::{Batch, BatchResult, LookupFailure, LookupOutcome};
use shared::{counter, gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;

/// Outcome of one spawned lookup task.
struct LookupTaskResult {
    /// Position of the identifier in the submitted batch
    index: usize,
    outcome: LookupOutcome,
}

/// Spawned lookup tasks with the batch position each one serves.
///
/// Needed to attribute aborted or panicked tasks, which return no value.
struct SpawnedTasks {
    join_set: JoinSet<LookupTaskResult>,
    task_positions: HashMap<Id, usize>,
}

/// Keeps the in-flight gauge accurate even when a task is aborted mid-lookup.
struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        gauge!(LOOKUPS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(LOOKUPS_INFLIGHT).decrement(1.0);
    }
}

pub struct FanOutExecutor {
    /// Maximum number of lookups in flight at once
    slots: usize,

    /// Time budget for a whole batch, queueing included
    batch_deadline: Duration,
}

impl FanOutExecutor {
    pub fn new(slots: usize, batch_deadline: Duration) -> Result<Self> {
        if slots == 0 {
            return Err(DoiRouterError::InvalidPoolSize);
        }
        Ok(Self {
            slots,
            batch_deadline,
        })
    }

    /// Looks up every identifier of `batch` and aggregates the outcomes.
    ///
    /// Never fails: individual failures and the deadline are reported inside
    /// the returned [`BatchResult`].
    pub async fn execute(&self, lookup: Arc<dyn Lookup>, batch: Batch) -> BatchResult {
        let started = Instant::now();
        let deadline = started + self.batch_deadline;
        histogram!(BATCH_SIZE).record(batch.len() as f64);

        tracing::debug!(
            lookup = lookup.name(),
            size = batch.len(),
            slots = self.slots,
            "Dispatching batch"
        );

        let mut aggregator = Aggregator::new(&batch);
        let spawned = self.spawn_lookup_tasks(lookup, batch);
        let timed_out = self
            .collect_results(spawned, &mut aggregator, deadline)
            .await;
        let result = aggregator.finish(timed_out);

        let timed_out_tag = if timed_out { "true" } else { "false" };
        histogram!(BATCH_DURATION, "timed_out" => timed_out_tag)
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            total = result.total,
            success = result.success,
            errors = result.errors,
            timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch completed"
        );

        result
    }

    /// Spawns one task per identifier. Each task waits for a slot before calling
    /// the provider and releases it as soon as the lookup returns.
    fn spawn_lookup_tasks(&self, lookup: Arc<dyn Lookup>, batch: Batch) -> SpawnedTasks {
        let slots = Arc::new(Semaphore::new(self.slots));
        let mut join_set = JoinSet::new();
        let mut task_positions = HashMap::with_capacity(batch.len());

        for (index, identifier) in batch.into_identifiers().into_iter().enumerate() {
            let slots = slots.clone();
            let lookup = lookup.clone();

            let abort_handle = join_set.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return LookupTaskResult {
                        index,
                        outcome: LookupOutcome::Failure(LookupFailure::Internal(
                            "worker pool closed".to_string(),
                        )),
                    };
                };
                let _inflight = InflightGuard::enter();

                let started = Instant::now();
                let outcome = lookup.lookup(&identifier).await;
                let tag = outcome.tag();
                histogram!(LOOKUP_DURATION, "outcome" => tag)
                    .record(started.elapsed().as_secs_f64());
                counter!(LOOKUP_OUTCOME, "outcome" => tag).increment(1);

                if let LookupOutcome::Failure(failure) = &outcome {
                    tracing::debug!(identifier = %identifier, error = %failure, "Lookup failed");
                }

                LookupTaskResult { index, outcome }
            });

            task_positions.insert(abort_handle.id(), index);
        }

        SpawnedTasks {
            join_set,
            task_positions,
        }
    }

    /// Feeds task outcomes to the aggregator until all tasks are done or the
    /// deadline passes. Returns whether the deadline cut the batch short.
    async fn collect_results(
        &self,
        spawned: SpawnedTasks,
        aggregator: &mut Aggregator,
        deadline: Instant,
    ) -> bool {
        let SpawnedTasks {
            mut join_set,
            mut task_positions,
        } = spawned;
        let mut timed_out = false;

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                joined = join_set.join_next_with_id() => match joined {
                    Some(joined) => {
                        self.handle_task_completion(joined, &mut task_positions, aggregator);
                    }
                    None => {
                        tracing::debug!("All lookups completed");
                        break;
                    }
                },
                _ = &mut deadline => {
                    let remaining = join_set.len();
                    tracing::warn!(
                        remaining,
                        "Batch deadline reached, aborting outstanding lookups"
                    );
                    counter!(BATCH_DEADLINE_EXCEEDED).increment(1);
                    join_set.abort_all();
                    timed_out = remaining > 0;
                    break;
                }
            }
        }

        // Aborted tasks report as cancelled; tasks that finished before the
        // abort landed still deliver their outcome.
        while let Some(joined) = join_set.join_next_with_id().await {
            self.handle_task_completion(joined, &mut task_positions, aggregator);
        }

        timed_out
    }

    fn handle_task_completion(
        &self,
        joined: std::result::Result<(Id, LookupTaskResult), JoinError>,
        task_positions: &mut HashMap<Id, usize>,
        aggregator: &mut Aggregator,
    ) {
        match joined {
            Ok((task_id, result)) => {
                task_positions.remove(&task_id);
                aggregator.record(result.index, result.outcome);
            }
            Err(e) => {
                let Some(index) = task_positions.remove(&e.id()) else {
                    tracing::error!(error = %e, "Untracked lookup task failed");
                    return;
                };
                let failure = if e.is_cancelled() {
                    LookupFailure::Timeout
                } else {
                    tracing::error!(index, error = %e, "Lookup task panicked");
                    LookupFailure::Internal(e.to_string())
                };
                aggregator.record(index, LookupOutcome::Failure(failure));
            }
        }
    }
}
