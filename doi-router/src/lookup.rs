use crate::types::{Identifier, LookupOutcome};
use async_trait::async_trait;

/// Resolves a single identifier.
///
/// Implementations never fail the batch: every problem is reported as a
/// [`LookupOutcome::Failure`] for that identifier. One call is one attempt.
#[async_trait]
pub trait Lookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, identifier: &Identifier) -> LookupOutcome;
}
