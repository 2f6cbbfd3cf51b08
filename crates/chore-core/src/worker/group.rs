//! A fixed-size group of worker loops sharing one queue.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::WorkerLoop;
use crate::error::LifecycleError;
use crate::observability::{FailureSink, WorkerStats};
use crate::queue::WorkQueue;

/// Worker group handle.
/// - `drain()` closes the queue and waits until every buffered item ran
/// - `abandon()` cancels the workers; only in-flight items finish
/// - dropping the handle leaves the workers running until the queue closes
pub struct WorkerGroup {
    queue: Arc<dyn WorkQueue>,
    cancel: CancellationToken,
    joins: Vec<JoinHandle<Result<WorkerStats, LifecycleError>>>,
}

impl WorkerGroup {
    /// Spawn `n` workers (at least one) on the current tokio runtime.
    pub fn spawn(n: usize, queue: Arc<dyn WorkQueue>, sink: Arc<dyn FailureSink>) -> Self {
        let n = n.max(1);
        let cancel = CancellationToken::new();

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = WorkerLoop::new(Arc::clone(&queue), Arc::clone(&sink))
                .with_name(format!("worker-{worker_id}"));
            let token = cancel.child_token();

            let join = tokio::spawn(async move { worker.run(&token).await });
            joins.push(join);
        }
        info!(workers = n, "worker group started");

        Self {
            queue,
            cancel,
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Parent token of every worker; cancelling it is equivalent to `abandon`
    /// minus the join.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Graceful shutdown: stop accepting work, finish everything buffered.
    pub async fn drain(self) -> WorkerStats {
        self.queue.close().await;
        info!("worker group draining");
        self.join().await
    }

    /// Fast shutdown: finish in-flight items only. Buffered items stay in
    /// the (now closed) queue.
    pub async fn abandon(self) -> WorkerStats {
        self.cancel.cancel();
        self.queue.close().await;
        let left = self.queue.len().await;
        if left > 0 {
            warn!(abandoned = left, "worker group abandoning buffered items");
        }
        self.join().await
    }

    async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for join in self.joins {
            match join.await {
                Ok(Ok(stats)) => total.merge(stats),
                Ok(Err(err)) => error!(error = %err, "worker failed to start"),
                Err(err) => error!(error = %err, "worker task ended abnormally"),
            }
        }
        info!(
            executed = total.executed,
            failed = total.failed,
            "worker group stopped"
        );
        total
    }
}
