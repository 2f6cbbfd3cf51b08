use thiserror::Error;

use crate::worker::WorkerState;

/// Errors returned synchronously by queue operations.
///
/// These always reach the caller of `enqueue` / `dequeue`; the queue never
/// swallows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The item carries no job (caller bug, not retried).
    #[error("work item is empty")]
    InvalidItem,

    /// Capacity reached under the `reject` policy.
    #[error("queue is full")]
    QueueFull,

    /// The queue was closed; no more work will be accepted or will arrive.
    #[error("queue is closed")]
    QueueClosed,

    /// The cancellation token fired while the caller was waiting.
    #[error("operation cancelled")]
    Cancelled,
}

/// Failure raised by a single work item.
///
/// Contained by the worker loop and handed to the failure sink; never
/// propagated to the loop's caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl ItemError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Misuse of the worker loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("worker loop cannot be started from state {0:?}")]
    AlreadyStarted(WorkerState),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown full-queue policy {0:?} (expected block, reject or unbounded)")]
    UnknownPolicy(String),
}
