//! Collects lookup outcomes into a [`BatchResult`].
//!
//! Outcomes are recorded per submission position, so each position counts
//! exactly once no matter in which order tasks finish. When the batch holds the
//! same identifier more than once, the outcome of the last occurrence is the
//! one kept in the result mapping.

use crate::types::{Batch, BatchResult, Identifier, LookupFailure, LookupOutcome};
use indexmap::IndexMap;

pub struct Aggregator {
    identifiers: Vec<Identifier>,
    outcomes: Vec<Option<LookupOutcome>>,
    success: usize,
    errors: usize,
}

impl Aggregator {
    pub fn new(batch: &Batch) -> Self {
        Self {
            identifiers: batch.identifiers().to_vec(),
            outcomes: vec![None; batch.len()],
            success: 0,
            errors: 0,
        }
    }

    /// Records the outcome for the identifier at `index`.
    ///
    /// Returns `false` (and changes nothing) if the position is unknown or was
    /// already recorded.
    pub fn record(&mut self, index: usize, outcome: LookupOutcome) -> bool {
        let Some(slot) = self.outcomes.get_mut(index) else {
            tracing::error!(index, "Outcome for unknown batch position");
            return false;
        };
        if slot.is_some() {
            tracing::warn!(index, "Duplicate outcome for batch position ignored");
            return false;
        }

        if outcome.is_success() {
            self.success += 1;
        } else {
            self.errors += 1;
        }
        *slot = Some(outcome);
        true
    }

    /// Number of positions still waiting for an outcome.
    pub fn pending(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_none()).count()
    }

    /// Produces the final snapshot. Positions that never reported are counted
    /// as timeouts.
    pub fn finish(mut self, timed_out: bool) -> BatchResult {
        let unreported = self.pending();
        if unreported > 0 {
            tracing::debug!(unreported, "Reporting unfinished positions as timeouts");
        }
        for index in 0..self.outcomes.len() {
            if self.outcomes[index].is_none() {
                self.record(index, LookupOutcome::Failure(LookupFailure::Timeout));
            }
        }

        let total = self.identifiers.len();
        let mut results = IndexMap::with_capacity(total);
        for (identifier, outcome) in self.identifiers.into_iter().zip(self.outcomes) {
            if let Some(outcome) = outcome {
                results.insert(identifier, outcome);
            }
        }

        BatchResult {
            results,
            total,
            success: self.success,
            errors: self.errors,
            timed_out,
        }
    }
}
