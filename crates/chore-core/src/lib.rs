//! chore-core
//!
//! Background work-item queue: producers enqueue deferred closures, worker
//! loops pull and run them one at a time, and a failing item never takes
//! the loop or the queue down with it.
//!
//! # Modules
//! - **item**: `WorkItem` and the `Job` trait it wraps
//! - **queue**: `WorkQueue` port, `BoundedQueue`, `FullPolicy`
//! - **worker**: `WorkerLoop` (single consumer) and `WorkerGroup` (bounded
//!   parallelism, drain/abandon)
//! - **observability**: `FailureSink`, `TracingSink`, `WorkerStats`
//! - **config**: `ChoreConfig` / `QueueConfig`
//! - **error**: error taxonomy

pub mod config;
pub mod error;
pub mod item;
pub mod observability;
pub mod queue;
pub mod worker;

pub use config::{ChoreConfig, QueueConfig};
pub use error::{ConfigError, ItemError, LifecycleError, QueueError};
pub use item::{Job, WorkItem};
pub use observability::{FailureSink, ItemFailure, TracingSink, WorkerStats};
pub use queue::{BoundedQueue, FullPolicy, WorkQueue};
pub use worker::{WorkerGroup, WorkerLoop, WorkerState};

pub use tokio_util::sync::CancellationToken;
