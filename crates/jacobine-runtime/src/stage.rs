//! The closed set of stage handlers the runtime dispatches to (Design Note:
//! dynamic dispatch-by-string becomes a trait + a registry of values).

use async_trait::async_trait;

use crate::deps::StageDeps;

/// Disposition a `process()` call terminates with — exactly one of these,
/// per spec §4.5 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The work unit succeeded, or the message is non-actionable and
    /// should be discarded silently.
    Ack,
    /// A poison message or unrecoverable per-message failure. Goes to the
    /// dead-letter queue if enabled for this stage, else is dropped.
    RejectNoRequeue,
    /// Transient failure; return to the queue head for later retry.
    NackRequeue,
}

/// One node in the analysis DAG, identified by its routing key.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The exact routing key this stage's queue is bound on.
    fn routing_key(&self) -> &'static str;

    /// Whether this stage's queue has a dead-letter target.
    fn dead_letter_enabled(&self) -> bool {
        true
    }

    /// Decode `body`, do the stage's work, and terminate with exactly one
    /// disposition. Implementations must honor the idempotence contract
    /// (spec §4.5): look up by id, check the precondition flag, write +
    /// publish before returning `Ack`.
    async fn process(&self, body: &[u8], deps: &StageDeps) -> Disposition;
}
