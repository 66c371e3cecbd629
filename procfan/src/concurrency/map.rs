//! Apply an async transform to every item of a sequence with bounded
//! concurrency, yielding results in completion order.

use std::future::{self, Future};
use std::panic;

use futures::stream::{self, Stream, StreamExt};
use tokio::task::JoinError;
use tracing::debug;

use super::limit::Completed;
use super::spawned::limit_concurrency_spawned;

/// Run `transform` over every item of `items`, at most `limit` at a time.
///
/// Items are pulled only as slots free up. Each transform runs as its own
/// tokio task, so it keeps making progress while the consumer is busy between
/// items. Output order is completion order. A failing transform (one that
/// resolves to `Err`) is yielded like any other value and does not stop the
/// remaining items; a panicking transform panics the consumer.
///
/// Dropping the returned stream aborts every transform still running.
pub fn map_unordered<S, F, Fut>(
    transform: F,
    items: S,
    limit: Option<usize>,
) -> impl Stream<Item = Fut::Output>
where
    S: Stream,
    F: FnMut(S::Item) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    limit_concurrency_spawned(items.map(transform), limit)
        .filter_map(|done| future::ready(joined(done)))
}

/// [`map_unordered`] over a synchronous sequence of items.
///
/// # Example
///
/// ```rust
/// use futures::StreamExt;
/// use procfan::concurrency::map_unordered_iter;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut squares: Vec<u32> = map_unordered_iter(|n: u32| async move { n * n }, 0..5, Some(2))
///     .collect()
///     .await;
/// squares.sort_unstable();
/// assert_eq!(squares, vec![0, 1, 4, 9, 16]);
/// # }
/// ```
pub fn map_unordered_iter<I, F, Fut>(
    transform: F,
    items: I,
    limit: Option<usize>,
) -> impl Stream<Item = Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    map_unordered(transform, stream::iter(items), limit)
}

/// Value of a finished transform task. A panic is resumed on the consumer;
/// a task cancelled by runtime shutdown has no value.
fn joined<T>(done: Completed<Result<T, JoinError>>) -> Option<T> {
    match done.value {
        Ok(value) => Some(value),
        Err(e) => match e.try_into_panic() {
            Ok(payload) => panic::resume_unwind(payload),
            Err(e) => {
                debug!(started = done.started, "Transform task cancelled: {e}");
                None
            }
        },
    }
}
