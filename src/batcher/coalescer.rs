//! The batcher handle.

use crate::batcher::batch::{self, DoWork, OpenBatch, Work};
use crate::core::{millis, BatchError, BatchResult};

use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

type Prefilter<P, E> = dyn Fn(&P) -> Result<(), E> + Send + Sync;

/// Coalesces concurrent calls into batched invocations of one work function.
///
/// The first call to [`run`](Self::run) opens a batch window of `timeout`.
/// Every call made while the window is open joins the same batch. When the
/// window closes, the work function runs once with all collected parameters
/// (in arrival order) and every caller receives the same result.
///
/// The work function must tolerate running concurrently with itself: a new
/// window can open while a previous batch is still executing.
///
/// Cloning a `Batcher` is cheap and yields a handle to the same batcher.
///
/// # Example
///
/// ```rust,ignore
/// use resiliency::batcher::Batcher;
/// use std::time::Duration;
///
/// let batcher = Batcher::new(Duration::from_millis(10), |ids: Vec<u64>| async move {
///     store.delete_many(&ids).await.map_err(|e| e.to_string())
/// });
///
/// // Concurrent callers share one `delete_many` call.
/// batcher.run(42).await?;
/// ```
pub struct Batcher<P, E> {
    timeout: Duration,
    do_work: Arc<DoWork<P, E>>,
    prefilter: Option<Arc<Prefilter<P, E>>>,
    shared: Arc<Shared<P, E>>,
}

struct Shared<P, E> {
    current: Mutex<Option<OpenBatch<P, E>>>,
    consumers: TaskTracker,
    next_id: AtomicU64,
}

impl<P, E> Batcher<P, E>
where
    P: Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a batcher that groups calls made within `timeout` of each
    /// other into a single call to `do_work`.
    ///
    /// A zero `timeout` disables batching: every call runs `do_work` on its
    /// own with a single-element batch.
    pub fn new<F, Fut>(timeout: Duration, do_work: F) -> Self
    where
        F: Fn(Vec<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            timeout,
            do_work: Arc::new(move |params: Vec<P>| do_work(params).boxed()),
            prefilter: None,
            shared: Arc::new(Shared {
                current: Mutex::new(None),
                consumers: TaskTracker::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Sets a check applied to each parameter before it joins a batch.
    ///
    /// If the filter returns an error, [`run`](Self::run) returns it as
    /// [`BatchError::Rejected`] to that caller alone and the parameter never
    /// reaches the work function. The filter applies to this handle and to
    /// clones made from it afterwards.
    pub fn with_prefilter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&P) -> Result<(), E> + Send + Sync + 'static,
    {
        self.prefilter = Some(Arc::new(filter));
        self
    }

    /// Returns the batch window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Adds `param` to the current batch and waits for that batch's result.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run(&self, param: P) -> BatchResult<E> {
        if let Some(prefilter) = &self.prefilter {
            prefilter(&param).map_err(BatchError::Rejected)?;
        }

        if self.timeout.is_zero() {
            return (self.do_work)(vec![param]).await.map_err(BatchError::Work);
        }

        let (future, result) = oneshot::channel();
        self.submit(Work { param, future });

        match result.await {
            Ok(result) => result.map_err(BatchError::Work),
            Err(_) => Err(BatchError::Abandoned),
        }
    }

    /// Flushes the open batch, if any, without waiting for its window.
    ///
    /// With `wait`, also waits until every batch already flushed has run
    /// and delivered its result. Calls to [`run`](Self::run) made after a
    /// shutdown open a fresh batch.
    pub async fn shutdown(&self, wait: bool) {
        self.shared.flush(None);

        if wait {
            self.shared.consumers.close();
            self.shared.consumers.wait().await;
            self.shared.consumers.reopen();
        }
    }

    fn submit(&self, work: Work<P, E>) {
        let mut current = self
            .shared
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let batch = current.get_or_insert_with(|| self.open_batch());
        tracing::trace!(batch_id = batch.id, "Joining batch");

        if batch.submit.send(work).is_err() {
            // The consumer is gone; the dropped work resolves as abandoned.
            tracing::warn!(batch_id = batch.id, "Batch consumer exited early");
            if let Some(batch) = current.take() {
                batch.timer.abort();
            }
        }
    }

    fn open_batch(&self) -> OpenBatch<P, E> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (submit, queue) = mpsc::unbounded_channel();

        self.shared
            .consumers
            .spawn(batch::drain(id, queue, Arc::clone(&self.do_work)));
        let timer = tokio::spawn(flush_after(Arc::downgrade(&self.shared), id, self.timeout));

        tracing::debug!(
            batch_id = id,
            timeout_ms = millis(self.timeout),
            "Opened batch"
        );

        OpenBatch { id, submit, timer }
    }
}

impl<P, E> Shared<P, E> {
    /// Closes the open batch. With `only`, the batch is closed only if it is
    /// the one with that id.
    fn flush(&self, only: Option<u64>) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match current.as_ref() {
            None => return,
            Some(batch) if only.is_some_and(|id| id != batch.id) => return,
            Some(_) => {}
        }

        if let Some(batch) = current.take() {
            batch.timer.abort();
            tracing::debug!(batch_id = batch.id, "Flushing batch");
        }
    }
}

async fn flush_after<P, E>(shared: Weak<Shared<P, E>>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    if let Some(shared) = shared.upgrade() {
        shared.flush(Some(id));
    }
}

impl<P, E> Clone for Batcher<P, E> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            do_work: Arc::clone(&self.do_work),
            prefilter: self.prefilter.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, E> fmt::Debug for Batcher<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self
            .shared
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some();

        f.debug_struct("Batcher")
            .field("timeout", &self.timeout)
            .field("has_prefilter", &self.prefilter.is_some())
            .field("batch_open", &open)
            .finish()
    }
}
