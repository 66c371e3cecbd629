//! Operations that run as tokio tasks.
//!
//! [`LimitConcurrency`] polls its operations in place, so they only advance
//! while the consumer polls the stream. Spawning each operation as it is
//! pulled lets it advance on its own (child output keeps flowing while the
//! consumer is busy elsewhere) while the limiter still bounds how many run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};

use super::limit::LimitConcurrency;

/// A spawned operation. Dropping it aborts the task.
#[derive(Debug)]
#[must_use = "dropping a spawned operation aborts it"]
pub struct Spawned<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Spawned<T> {
    /// Start `operation` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<Fut>(operation: Fut) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(operation),
        }
    }
}

impl<T> Future for Spawned<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}

impl<T> Drop for Spawned<T> {
    fn drop(&mut self) {
        // No-op once the task has finished.
        self.handle.abort();
    }
}

/// [`limit_concurrency`](super::limit_concurrency), with every operation
/// spawned as a task at the moment it is pulled from the source.
///
/// Running operations make progress whether or not the stream is being
/// polled. Dropping the stream aborts every task still in flight. A task that
/// panics yields `Err` with the panic inside the [`JoinError`].
pub fn limit_concurrency_spawned<S>(
    source: S,
    limit: Option<usize>,
) -> LimitConcurrency<impl Stream<Item = Spawned<<S::Item as Future>::Output>>>
where
    S: Stream,
    S::Item: Future + Send + 'static,
    <S::Item as Future>::Output: Send + 'static,
{
    LimitConcurrency::new(source.map(Spawned::spawn), limit)
}
