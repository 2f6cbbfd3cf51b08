//! Bounded in-memory queue implementation.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{FullPolicy, WorkQueue};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::item::WorkItem;

/// A producer parked on a full queue, holding the item it wants to add.
struct BlockedProducer {
    ticket: u64,
    item: WorkItem,
    admitted: oneshot::Sender<Result<(), QueueError>>,
}

/// In-memory queue state.
struct QueueState {
    /// Accepted items, oldest first.
    items: VecDeque<WorkItem>,

    /// Producers waiting for space, longest waiting first.
    blocked: VecDeque<BlockedProducer>,

    closed: bool,

    next_ticket: u64,
}

/// FIFO work queue with a capacity and a full-queue policy.
///
/// Design:
/// - One async mutex guards the buffer, the blocked-producer list and the
///   closed flag, so every enqueue/dequeue is atomic w.r.t. the others.
/// - Blocked producers are admitted by `dequeue` itself: the freed slot is
///   handed to the oldest waiter under the same lock, which keeps both FIFO
///   order and producer fairness.
/// - Dequeuers park on a `Notify`; `close` wakes all of them.
pub struct BoundedQueue {
    capacity: usize,
    policy: FullPolicy,
    state: Mutex<QueueState>,
    not_empty: Notify,
}

impl BoundedQueue {
    /// A capacity of 0 means unbounded regardless of policy.
    pub fn new(capacity: usize, policy: FullPolicy) -> Self {
        Self {
            capacity,
            policy,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                blocked: VecDeque::new(),
                closed: false,
                next_ticket: 0,
            }),
            not_empty: Notify::new(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.capacity, config.policy)
    }

    pub fn unbounded() -> Self {
        Self::new(0, FullPolicy::Unbounded)
    }

    pub fn capacity(&self) -> Option<usize> {
        (!self.is_unbounded()).then_some(self.capacity)
    }

    pub fn policy(&self) -> FullPolicy {
        self.policy
    }

    fn is_unbounded(&self) -> bool {
        self.policy == FullPolicy::Unbounded || self.capacity == 0
    }

    fn has_room(&self, state: &QueueState) -> bool {
        self.is_unbounded() || state.items.len() < self.capacity
    }

    /// Push directly if there is room and nobody is queued ahead of us.
    fn push_if_room(&self, state: &mut QueueState, item: WorkItem) -> Result<(), WorkItem> {
        if state.blocked.is_empty() && self.has_room(state) {
            state.items.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Move blocked producers into freed slots, oldest first.
    ///
    /// Producers whose enqueue future was dropped are skipped and their
    /// items discarded: they were never accepted.
    fn admit_blocked(&self, state: &mut QueueState) {
        while self.has_room(state) {
            let Some(producer) = state.blocked.pop_front() else {
                break;
            };
            let BlockedProducer {
                ticket,
                item,
                admitted,
            } = producer;
            if admitted.send(Ok(())).is_ok() {
                trace!(ticket, "blocked producer admitted");
                state.items.push_back(item);
            }
        }
    }

    /// Called when a blocked producer's token fired.
    async fn withdraw(
        &self,
        ticket: u64,
        admitted: oneshot::Receiver<Result<(), QueueError>>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.blocked.iter().position(|p| p.ticket == ticket) {
            state.blocked.remove(pos);
            trace!(ticket, "blocked producer withdrew");
            return Err(QueueError::Cancelled);
        }
        drop(state);

        // Admitted (or released by close) before we got the lock; the
        // outcome is already in the channel.
        admitted.await.unwrap_or(Err(QueueError::QueueClosed))
    }
}

#[async_trait]
impl WorkQueue for BoundedQueue {
    async fn enqueue(&self, item: WorkItem, cancel: &CancellationToken) -> Result<(), QueueError> {
        if item.is_empty() {
            return Err(QueueError::InvalidItem);
        }

        let (ticket, mut admitted) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::QueueClosed);
            }
            let item = match self.push_if_room(&mut state, item) {
                Ok(()) => {
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                Err(item) => item,
            };
            if self.policy == FullPolicy::Reject {
                return Err(QueueError::QueueFull);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.blocked.push_back(BlockedProducer {
                ticket,
                item,
                admitted: tx,
            });
            debug!(
                ticket,
                waiting = state.blocked.len(),
                "queue full, producer blocked"
            );
            (ticket, rx)
        };

        tokio::select! {
            biased;
            outcome = &mut admitted => {
                return outcome.unwrap_or(Err(QueueError::QueueClosed));
            }
            () = cancel.cancelled() => {}
        }
        self.withdraw(ticket, admitted).await
    }

    async fn try_enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        if item.is_empty() {
            return Err(QueueError::InvalidItem);
        }
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::QueueClosed);
        }
        self.push_if_room(&mut state, item)
            .map_err(|_| QueueError::QueueFull)?;
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<WorkItem, QueueError> {
        loop {
            // Register before checking so a close or enqueue between the
            // check and the await is not missed.
            let notified = self.not_empty.notified();

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    self.admit_blocked(&mut state);
                    let more = !state.items.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on to another parked consumer.
                        self.not_empty.notify_one();
                    }
                    return Ok(item);
                }
                if state.closed {
                    return Err(QueueError::QueueClosed);
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QueueError::Cancelled),
                () = notified => {}
            }
        }
    }

    async fn close(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return false;
        }
        state.closed = true;
        let released = state.blocked.len();
        for producer in state.blocked.drain(..) {
            let _ = producer.admitted.send(Err(QueueError::QueueClosed));
        }
        let buffered = state.items.len();
        drop(state);

        self.not_empty.notify_waiters();
        debug!(buffered, released, "queue closed");
        true
    }

    async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
