//! Worker loop: dequeue → execute → contain failure → repeat.

mod group;
mod state;

pub use group::WorkerGroup;
pub use state::WorkerState;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ItemError, LifecycleError, QueueError};
use crate::item::{WorkItem, panic_message};
use crate::observability::{FailureSink, ItemFailure, WorkerStats};
use crate::queue::WorkQueue;

/// A single logical consumer of a `WorkQueue`.
///
/// Each item runs in its own tokio task so that a panic is recovered from
/// the `JoinError` instead of unwinding through the loop. Items run one at
/// a time: execution order equals dequeue order.
pub struct WorkerLoop {
    name: String,
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn FailureSink>,
    state: watch::Sender<WorkerState>,
}

impl WorkerLoop {
    pub fn new(queue: Arc<dyn WorkQueue>, sink: Arc<dyn FailureSink>) -> Self {
        Self {
            name: "worker".to_string(),
            queue,
            sink,
            state: watch::Sender::new(WorkerState::Idle),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires or the queue is closed and drained.
    ///
    /// Per-item failures never surface here; they go to the sink. The only
    /// error is calling `run` on a loop that is not `Idle`.
    ///
    /// Dropping the returned future also stops the loop. An item that was
    /// running at that point keeps going on its own task and its outcome is
    /// not reported.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<WorkerStats, LifecycleError> {
        self.start()?;
        let _stopped = StopOnDrop(&self.state);
        info!(worker = %self.name, "worker loop started");

        let mut stats = WorkerStats::default();
        loop {
            // Never start a new dequeue once cancellation was requested.
            if cancel.is_cancelled() {
                debug!(worker = %self.name, "cancellation requested");
                break;
            }

            let item = match self.queue.dequeue(cancel).await {
                Ok(item) => item,
                Err(QueueError::QueueClosed) => {
                    debug!(worker = %self.name, "queue closed and drained");
                    break;
                }
                Err(QueueError::Cancelled) => {
                    debug!(worker = %self.name, "cancelled while waiting for work");
                    break;
                }
                Err(err) => {
                    warn!(worker = %self.name, error = %err, "unexpected dequeue error");
                    break;
                }
            };

            self.execute(item, cancel, &mut stats).await;
        }

        self.state.send_replace(WorkerState::Stopping);
        info!(
            worker = %self.name,
            executed = stats.executed,
            failed = stats.failed,
            "worker loop stopped"
        );
        Ok(stats)
    }

    fn start(&self) -> Result<(), LifecycleError> {
        let mut current = WorkerState::Idle;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if state.can_start() {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        if started {
            Ok(())
        } else {
            Err(LifecycleError::AlreadyStarted(current))
        }
    }

    async fn execute(&self, item: WorkItem, cancel: &CancellationToken, stats: &mut WorkerStats) {
        let label = item.label().to_string();
        debug!(worker = %self.name, item = %label, "executing work item");

        let mut handle = tokio::spawn(item.execute(cancel.clone()));
        let finished = tokio::select! {
            joined = &mut handle => Some(joined),
            () = cancel.cancelled() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                // Cancellation is advisory; the running item decides when to stop.
                self.state.send_replace(WorkerState::Stopping);
                debug!(worker = %self.name, item = %label, "waiting for in-flight item");
                handle.await
            }
        };

        stats.executed += 1;
        let error = match joined {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(join_error) => ItemError::from(join_error),
        };
        stats.failed += 1;
        self.report(ItemFailure {
            worker: self.name.clone(),
            item: label,
            error,
        });
    }

    fn report(&self, failure: ItemFailure) {
        let sink = &self.sink;
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| sink.report(&failure))) {
            error!(
                worker = %failure.worker,
                item = %failure.item,
                error = %failure.error,
                sink_panic = %panic_message(payload.as_ref()),
                "failure sink panicked while reporting"
            );
        }
    }
}

/// Moves the loop to `Stopped` when `run` returns or is dropped.
struct StopOnDrop<'a>(&'a watch::Sender<WorkerState>);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = WorkerState::Stopped;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::queue::{BoundedQueue, FullPolicy};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ItemFailure>>);

    impl FailureSink for Recorder {
        fn report(&self, failure: &ItemFailure) {
            self.0.lock().unwrap().push(failure.clone());
        }
    }

    impl Recorder {
        fn failures(&self) -> Vec<ItemFailure> {
            self.0.lock().unwrap().clone()
        }
    }

    fn setup() -> (Arc<BoundedQueue>, Arc<Recorder>, WorkerLoop) {
        let queue = Arc::new(BoundedQueue::new(16, FullPolicy::Block));
        let sink = Arc::new(Recorder::default());
        let worker = WorkerLoop::new(queue.clone(), sink.clone()).with_name("w0");
        (queue, sink, worker)
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> WorkItem {
        let log = Arc::clone(log);
        WorkItem::new(move |_| async move {
            log.lock().unwrap().push(label);
            Ok(())
        })
        .with_label(label)
    }

    #[tokio::test]
    async fn failing_item_is_reported_and_the_loop_continues() {
        let (queue, sink, worker) = setup();
        let token = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue
            .enqueue(
                WorkItem::new(|_| async { Err(ItemError::failed("smtp timeout")) }).with_label("A"),
                &token,
            )
            .await
            .unwrap();
        queue.enqueue(recording(&log, "B"), &token).await.unwrap();
        queue.close().await;

        let stats = worker.run(&token).await.unwrap();

        assert_eq!((stats.executed, stats.failed), (2, 1));
        assert_eq!(*log.lock().unwrap(), vec!["B"]);
        assert_eq!(
            sink.failures(),
            vec![ItemFailure {
                worker: "w0".to_string(),
                item: "A".to_string(),
                error: ItemError::failed("smtp timeout"),
            }]
        );
    }

    async fn explode() -> Result<(), ItemError> {
        panic!("index out of range")
    }

    #[tokio::test]
    async fn panicking_item_is_contained() {
        let (queue, sink, worker) = setup();
        let token = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue
            .enqueue(WorkItem::new(|_| explode()), &token)
            .await
            .unwrap();
        queue
            .enqueue(recording(&log, "after"), &token)
            .await
            .unwrap();
        queue.close().await;

        let stats = worker.run(&token).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(
            sink.failures()[0].error,
            ItemError::Panicked("index out of range".to_string())
        );
    }

    #[tokio::test]
    async fn panicking_sink_does_not_stop_the_loop() {
        let queue = Arc::new(BoundedQueue::new(16, FullPolicy::Block));
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = {
            let calls = Arc::clone(&calls);
            move |_: &ItemFailure| {
                calls.fetch_add(1, Ordering::SeqCst);
                panic!("sink exploded");
            }
        };
        let worker = WorkerLoop::new(queue.clone(), Arc::new(sink));
        let token = CancellationToken::new();

        for _ in 0..3 {
            queue
                .enqueue(
                    WorkItem::new(|_| async { Err(ItemError::failed("x")) }),
                    &token,
                )
                .await
                .unwrap();
        }
        queue.close().await;

        let stats = worker.run(&token).await.unwrap();
        assert_eq!((stats.executed, stats.failed), (3, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn executes_in_dequeue_order() {
        let (queue, sink, worker) = setup();
        let token = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["one", "two", "three"] {
            queue.enqueue(recording(&log, label), &token).await.unwrap();
        }
        queue.close().await;
        worker.run(&token).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["one", "two", "three"]);
        assert!(sink.failures().is_empty());
    }

    #[tokio::test]
    async fn rerun_after_stop_is_a_lifecycle_error() {
        let (queue, _sink, worker) = setup();
        let token = CancellationToken::new();
        queue.close().await;

        assert_eq!(worker.state(), WorkerState::Idle);
        worker.run(&token).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        assert_eq!(
            worker.run(&token).await,
            Err(LifecycleError::AlreadyStarted(WorkerState::Stopped))
        );
    }

    #[tokio::test]
    async fn concurrent_second_run_is_rejected() {
        let (_queue, _sink, worker) = setup();
        let worker = Arc::new(worker);
        let token = CancellationToken::new();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            let token = token.clone();
            async move { worker.run(&token).await }
        });
        let mut states = worker.watch_state();
        states
            .wait_for(|s| *s == WorkerState::Running)
            .await
            .unwrap();

        assert_eq!(
            worker.run(&token).await,
            Err(LifecycleError::AlreadyStarted(WorkerState::Running))
        );

        token.cancel();
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_while_idle_stops_without_consuming() {
        let (queue, _sink, worker) = setup();
        let worker = Arc::new(worker);
        let token = CancellationToken::new();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            let token = token.clone();
            async move { worker.run(&token).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let stats = tokio::time::timeout(Duration::from_millis(200), running)
            .await
            .expect("cancel should stop an idle loop")
            .unwrap()
            .unwrap();
        assert_eq!(stats.executed, 0);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!queue.is_closed().await);
    }

    #[tokio::test]
    async fn cancel_lets_in_flight_item_finish_and_takes_nothing_more() {
        let (queue, _sink, worker) = setup();
        let worker = Arc::new(worker);
        let token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicUsize::new(0));

        let slow = {
            let finished = Arc::clone(&finished);
            WorkItem::new(move |_| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        queue.enqueue(slow, &token).await.unwrap();
        queue
            .enqueue(
                WorkItem::new(|_| async { Ok(()) }).with_label("left"),
                &token,
            )
            .await
            .unwrap();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            let token = token.clone();
            async move { worker.run(&token).await }
        });
        started_rx.await.unwrap();

        token.cancel();
        let mut states = worker.watch_state();
        states
            .wait_for(|s| *s == WorkerState::Stopping)
            .await
            .unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        let stats = running.await.unwrap().unwrap();

        assert_eq!((stats.executed, stats.failed), (1, 0));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn item_can_observe_the_loop_token() {
        let (queue, sink, worker) = setup();
        let worker = Arc::new(worker);
        let token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        queue
            .enqueue(
                WorkItem::new(move |cancel| async move {
                    let _ = started_tx.send(());
                    cancel.cancelled().await;
                    Err(ItemError::Cancelled)
                })
                .with_label("cooperative"),
                &token,
            )
            .await
            .unwrap();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            let token = token.clone();
            async move { worker.run(&token).await }
        });
        started_rx.await.unwrap();
        token.cancel();

        let stats = running.await.unwrap().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(sink.failures()[0].error, ItemError::Cancelled);
    }

    #[tokio::test]
    async fn dropping_run_mid_item_leaves_the_loop_stopped() {
        let (queue, sink, worker) = setup();
        let worker = Arc::new(worker);
        let token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        queue
            .enqueue(
                WorkItem::new(move |_| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Err(ItemError::failed("finished after the loop was dropped"))
                }),
                &token,
            )
            .await
            .unwrap();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            let token = token.clone();
            async move { worker.run(&token).await }
        });
        started_rx.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Running);

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(
            worker.run(&token).await,
            Err(LifecycleError::AlreadyStarted(WorkerState::Stopped))
        );

        let _ = release_tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.failures().is_empty());
    }
}
