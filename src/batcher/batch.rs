//! A single batch window and the consumer that drains it.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// The batched work function, type-erased.
pub(crate) type DoWork<P, E> = dyn Fn(Vec<P>) -> BoxFuture<'static, Result<(), E>> + Send + Sync;

/// A parameter waiting in a batch together with the slot its caller waits on.
pub(crate) struct Work<P, E> {
    pub(crate) param: P,
    pub(crate) future: oneshot::Sender<Result<(), E>>,
}

/// The batch currently accepting work.
///
/// Dropping it closes the queue, which is what tells the consumer that the
/// window is over.
pub(crate) struct OpenBatch<P, E> {
    /// Identifies this window to its own flush timer.
    pub(crate) id: u64,
    pub(crate) submit: mpsc::UnboundedSender<Work<P, E>>,
    pub(crate) timer: JoinHandle<()>,
}

/// Collects every queued item until the queue closes, runs the batched work
/// once and hands the same result to every waiting caller.
pub(crate) async fn drain<P, E>(
    id: u64,
    mut queue: mpsc::UnboundedReceiver<Work<P, E>>,
    do_work: Arc<DoWork<P, E>>,
) where
    E: Clone,
{
    let mut params = Vec::new();
    let mut futures = Vec::new();

    while let Some(work) = queue.recv().await {
        params.push(work.param);
        futures.push(work.future);
    }

    if params.is_empty() {
        return;
    }

    let size = params.len();
    tracing::debug!(batch_id = id, size, "Running batch");

    let result = do_work(params).await;

    tracing::debug!(batch_id = id, size, ok = result.is_ok(), "Batch completed");

    for future in futures {
        // The caller may have stopped waiting; nothing to deliver then.
        let _ = future.send(result.clone());
    }
}
