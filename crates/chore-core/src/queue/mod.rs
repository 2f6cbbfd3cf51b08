//! Queue module: the `WorkQueue` port and its bounded in-memory implementation.

mod bounded;
mod policy;

pub use bounded::BoundedQueue;
pub use policy::FullPolicy;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::item::WorkItem;

/// Queue port (interface).
///
/// Contract shared by every implementation:
/// - an accepted item is delivered to exactly one `dequeue` caller, once,
///   in acceptance order;
/// - after `close`, buffered items stay dequeuable and nothing new is
///   accepted;
/// - a cancelled wait has no side effect (nothing accepted, nothing consumed).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Accept an item, waiting for space if the policy says so.
    async fn enqueue(&self, item: WorkItem, cancel: &CancellationToken) -> Result<(), QueueError>;

    /// Accept an item without waiting. A full queue yields `QueueFull`
    /// whatever the policy.
    async fn try_enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Remove the oldest item, waiting while the queue is empty and open.
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<WorkItem, QueueError>;

    /// Close the queue. Returns `true` only for the call that closed it.
    async fn close(&self) -> bool;

    async fn len(&self) -> usize;

    async fn is_closed(&self) -> bool;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
