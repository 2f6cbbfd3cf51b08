//! Work items: opaque deferred units of work.
//!
//! A `WorkItem` owns exactly one `Job` and runs it at most once. Items are
//! built by producers, owned by the queue while buffered and handed to a
//! single worker on dequeue.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::ItemError;

const DEFAULT_LABEL: &str = "work-item";

/// A unit of work executed once by a worker.
///
/// The token is advisory: the worker never aborts a running job, so
/// long-running jobs should watch it and return early.
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ItemError>;
}

struct AsyncFnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for AsyncFnJob<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
{
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ItemError> {
        (self.0)(cancel).await
    }
}

struct BlockingFnJob<F>(F);

#[async_trait]
impl<F> Job for BlockingFnJob<F>
where
    F: FnOnce(CancellationToken) -> Result<(), ItemError> + Send + 'static,
{
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ItemError> {
        let f = self.0;
        tokio::task::spawn_blocking(move || f(cancel))
            .await
            .map_err(ItemError::from)?
    }
}

/// Deferred work submitted by a producer.
///
/// The label is reporting context only; items have no identity and are
/// neither comparable nor cloneable.
pub struct WorkItem {
    label: Cow<'static, str>,
    job: Option<Box<dyn Job>>,
}

impl WorkItem {
    /// Wraps an async closure.
    ///
    /// # Example
    /// ```ignore
    /// let item = WorkItem::new(|cancel| async move {
    ///     tokio::select! {
    ///         _ = cancel.cancelled() => Err(ItemError::Cancelled),
    ///         _ = do_io() => Ok(()),
    ///     }
    /// });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
    {
        Self::from_job(AsyncFnJob(f))
    }

    /// Wraps a synchronous closure; it runs on tokio's blocking pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Result<(), ItemError> + Send + 'static,
    {
        Self::from_job(BlockingFnJob(f))
    }

    pub fn from_job(job: impl Job) -> Self {
        Self {
            label: Cow::Borrowed(DEFAULT_LABEL),
            job: Some(Box::new(job)),
        }
    }

    /// An item with no job. Queues reject it with `QueueError::InvalidItem`.
    pub fn empty() -> Self {
        Self {
            label: Cow::Borrowed(DEFAULT_LABEL),
            job: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.job.is_none()
    }

    /// Runs the job on the current task. An empty item completes immediately.
    pub async fn execute(self, cancel: CancellationToken) -> Result<(), ItemError> {
        match self.job {
            Some(job) => job.run(cancel).await,
            None => Ok(()),
        }
    }
}

impl Default for WorkItem {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("label", &self.label)
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl From<JoinError> for ItemError {
    fn from(err: JoinError) -> Self {
        if err.is_cancelled() {
            return ItemError::Cancelled;
        }
        match err.try_into_panic() {
            Ok(payload) => ItemError::Panicked(panic_message(payload.as_ref())),
            Err(err) => ItemError::Failed(err.to_string()),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
