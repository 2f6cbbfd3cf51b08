//! Failure reporting and worker counters.

use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// A contained per-item failure, with the context it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub worker: String,
    pub item: String,
    pub error: ItemError,
}

/// Receives every per-item failure caught by a worker loop, exactly once.
///
/// A panicking sink is caught by the loop; it cannot stop it.
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: &ItemFailure);
}

impl<F> FailureSink for F
where
    F: Fn(&ItemFailure) + Send + Sync,
{
    fn report(&self, failure: &ItemFailure) {
        self(failure)
    }
}

/// Default sink: one `error` event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, failure: &ItemFailure) {
        tracing::error!(
            worker = %failure.worker,
            item = %failure.item,
            error = %failure.error,
            "work item failed"
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Items dequeued and run to completion or failure.
    pub executed: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn succeeded(&self) -> u64 {
        self.executed - self.failed
    }

    pub fn merge(&mut self, other: WorkerStats) {
        self.executed += other.executed;
        self.failed += other.failed;
    }
}
