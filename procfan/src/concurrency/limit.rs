//! Bounded-concurrency execution of a stream of operations.
//!
//! [`LimitConcurrency`] keeps at most `limit` operations in flight. A new
//! operation is pulled from the source only when a slot is free, and each
//! operation's output is yielded as soon as it resolves, so results arrive in
//! completion order rather than source order.
//!
//! Pulling from the source and waiting on in-flight operations share the
//! same waker: whichever becomes ready first wakes the consumer, and nothing
//! is polled in a loop while both are pending.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, FusedStream, FuturesUnordered, Stream, StreamExt};
use tracing::{debug, trace, warn};

/// Limit used when none is given and the host parallelism can't be detected.
pub const FALLBACK_LIMIT: usize = 4;

/// Number of processing units available to this process, or [`FALLBACK_LIMIT`].
pub fn default_limit() -> usize {
    std::thread::available_parallelism().map_or(FALLBACK_LIMIT, NonZeroUsize::get)
}

fn resolve_limit(limit: Option<usize>) -> usize {
    match limit {
        None => default_limit(),
        Some(0) => {
            warn!("Concurrency limit of 0 can never start work, using 1");
            1
        }
        Some(n) => n,
    }
}

/// An operation that has resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<T> {
    /// Zero-based position of the operation in source order.
    pub started: usize,

    /// The value the operation resolved to.
    pub value: T,
}

impl<T> Completed<T> {
    /// Discard the bookkeeping and keep the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// One slot of the in-flight window.
struct InFlight<Fut> {
    started: usize,
    operation: Pin<Box<Fut>>,
}

impl<Fut: Future> Future for InFlight<Fut> {
    type Output = Completed<Fut::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let started = self.started;
        self.operation
            .as_mut()
            .poll(cx)
            .map(|value| Completed { started, value })
    }
}

/// Stream returned by [`limit_concurrency`].
///
/// Dropping the stream drops every operation still in flight, which cancels
/// them at their next suspension point.
#[must_use = "streams do nothing unless polled"]
pub struct LimitConcurrency<S: Stream> {
    /// Source cursor over operations that have not started yet.
    source: Pin<Box<S>>,

    /// Started, unresolved operations. Never larger than `limit`.
    in_flight: FuturesUnordered<InFlight<S::Item>>,

    limit: usize,

    /// Number of operations pulled from the source so far.
    started: usize,

    /// Set once the source has returned `None`; it is never polled again.
    exhausted: bool,
}

impl<S> LimitConcurrency<S>
where
    S: Stream,
    S::Item: Future,
{
    /// Wrap `source`, running at most `limit` of its operations at once.
    ///
    /// `None` uses [`default_limit`]. A limit of 0 is raised to 1.
    pub fn new(source: S, limit: Option<usize>) -> Self {
        Self {
            source: Box::pin(source),
            in_flight: FuturesUnordered::new(),
            limit: resolve_limit(limit),
            started: 0,
            exhausted: false,
        }
    }

    /// The effective concurrency limit.
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of operations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of operations pulled from the source so far.
    pub const fn started(&self) -> usize {
        self.started
    }

    /// Whether the source has run dry. In-flight operations may remain.
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fill free slots from the source, stopping at the first `Pending`.
    fn top_up(&mut self, cx: &mut Context<'_>) {
        while !self.exhausted && self.in_flight.len() < self.limit {
            match self.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(operation)) => {
                    trace!(
                        started = self.started,
                        in_flight = self.in_flight.len() + 1,
                        "Starting operation"
                    );
                    self.in_flight.push(InFlight {
                        started: self.started,
                        operation: Box::pin(operation),
                    });
                    self.started += 1;
                }
                Poll::Ready(None) => {
                    debug!(
                        started = self.started,
                        in_flight = self.in_flight.len(),
                        "Operation source exhausted"
                    );
                    self.exhausted = true;
                }
                Poll::Pending => break,
            }
        }
    }
}

impl<S> Stream for LimitConcurrency<S>
where
    S: Stream,
    S::Item: Future,
{
    type Item = Completed<<S::Item as Future>::Output>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.top_up(cx);

        match this.in_flight.poll_next_unpin(cx) {
            Poll::Ready(Some(done)) => Poll::Ready(Some(done)),
            Poll::Ready(None) if this.exhausted => Poll::Ready(None),
            // Window is empty but the source is still pending; its waker is registered.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let in_flight = self.in_flight.len();
        if self.exhausted {
            return (in_flight, Some(in_flight));
        }
        let (lower, upper) = self.source.size_hint();
        (
            lower.saturating_add(in_flight),
            upper.and_then(|upper| upper.checked_add(in_flight)),
        )
    }
}

impl<S> FusedStream for LimitConcurrency<S>
where
    S: Stream,
    S::Item: Future,
{
    fn is_terminated(&self) -> bool {
        self.exhausted && self.in_flight.is_empty()
    }
}

impl<S: Stream> fmt::Debug for LimitConcurrency<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConcurrency")
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight.len())
            .field("started", &self.started)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Run at most `limit` operations from `source` concurrently, yielding each
/// one as it completes.
///
/// The source is pulled lazily, never more than the number of free slots,
/// so it may be unbounded.
///
/// # Example
///
/// ```rust
/// use futures::StreamExt;
/// use procfan::concurrency::limit_concurrency;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let operations = futures::stream::iter((0..10).map(|n| async move { n * 2 }));
/// let mut total = 0;
/// let mut completed = limit_concurrency(operations, Some(3));
/// while let Some(done) = completed.next().await {
///     total += done.value;
/// }
/// assert_eq!(total, 90);
/// # }
/// ```
pub fn limit_concurrency<S>(source: S, limit: Option<usize>) -> LimitConcurrency<S>
where
    S: Stream,
    S::Item: Future,
{
    LimitConcurrency::new(source, limit)
}

/// [`limit_concurrency`] over a synchronous sequence of operations.
pub fn limit_concurrency_iter<I>(
    operations: I,
    limit: Option<usize>,
) -> LimitConcurrency<stream::Iter<I::IntoIter>>
where
    I: IntoIterator,
    I::Item: Future,
{
    LimitConcurrency::new(stream::iter(operations), limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    /// Tracks how many operations are running and the most seen at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(self: &Arc<Self>) -> GaugeGuard {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            GaugeGuard(Arc::clone(self))
        }

        fn current(&self) -> usize {
            self.current.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    struct GaugeGuard(Arc<Gauge>);

    impl Drop for GaugeGuard {
        fn drop(&mut self) {
            self.0.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut completed = limit_concurrency_iter(Vec::<future::Ready<u32>>::new(), Some(4));

        assert!(completed.next().await.is_none());
        assert_eq!(completed.started(), 0);
        assert!(completed.is_terminated());
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let gauge = Arc::new(Gauge::default());

        let operations = (0..20u64).map(|n| {
            let gauge = Arc::clone(&gauge);
            async move {
                let _guard = gauge.enter();
                sleep(Duration::from_millis(5 + (n * 7) % 13)).await;
                n
            }
        });

        let mut values: Vec<u64> = limit_concurrency_iter(operations, Some(3))
            .map(Completed::into_value)
            .collect()
            .await;
        values.sort_unstable();

        assert_eq!(values, (0..20).collect::<Vec<_>>());
        assert_eq!(gauge.peak(), 3);
        assert_eq!(gauge.current(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_source_is_pulled_lazily() {
        let pulled = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&pulled);
        let operations = (0u64..).map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                sleep(Duration::from_millis(2)).await;
                n
            }
        });

        let mut completed = limit_concurrency_iter(operations, Some(2));
        for yielded in 1..=5 {
            assert!(completed.next().await.is_some());
            // The window refills before each harvest, leaving one slot running.
            assert_eq!(completed.started(), yielded + 1);
            assert_eq!(completed.in_flight(), 1);
            assert_eq!(pulled.load(Ordering::SeqCst), completed.started());
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_async_source() {
        let source = stream::unfold(0u32, |n| async move {
            if n == 5 {
                return None;
            }
            sleep(Duration::from_millis(3)).await;
            Some((async move { n * 10 }, n + 1))
        });

        let mut values: Vec<u32> = limit_concurrency(source, Some(2))
            .map(Completed::into_value)
            .collect()
            .await;
        values.sort_unstable();

        assert_eq!(values, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let polls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&polls);
        let mut remaining = 2u32;
        let source = stream::poll_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if remaining == 0 {
                Poll::Ready(None)
            } else {
                remaining -= 1;
                Poll::Ready(Some(future::ready(remaining)))
            }
        });

        let mut completed = limit_concurrency(source, Some(4));
        let mut values = Vec::new();
        while let Some(done) = completed.next().await {
            values.push(done.value);
        }
        values.sort_unstable();
        assert_eq!(values, vec![0, 1]);

        let polls_at_end = polls.load(Ordering::SeqCst);
        assert!(completed.next().await.is_none());
        assert!(completed.next().await.is_none());
        assert!(completed.is_terminated());
        assert_eq!(polls.load(Ordering::SeqCst), polls_at_end);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let operations = (0..5u32).map(|n| async move {
            sleep(Duration::from_millis(u64::from(n) * 2)).await;
            if n == 2 {
                Err(format!("operation {n} failed"))
            } else {
                Ok(n)
            }
        });

        let results: Vec<Result<u32, String>> = limit_concurrency_iter(operations, Some(2))
            .map(Completed::into_value)
            .collect()
            .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
        assert!(results.contains(&Err("operation 2 failed".to_string())));
    }

    #[tokio::test]
    async fn test_drop_cancels_in_flight() {
        let gauge = Arc::new(Gauge::default());

        let operations = (0..6u32).map(|n| {
            let gauge = Arc::clone(&gauge);
            async move {
                let _guard = gauge.enter();
                let wait = if n == 0 { 10 } else { 3_600_000 };
                sleep(Duration::from_millis(wait)).await;
                n
            }
        });

        let mut completed = limit_concurrency_iter(operations, Some(3));
        let first = completed.next().await.map(Completed::into_value);
        assert_eq!(first, Some(0));
        assert_eq!(completed.in_flight(), 2);
        assert_eq!(gauge.current(), 2);

        drop(completed);
        assert_eq!(gauge.current(), 0);
    }

    #[tokio::test]
    async fn test_limit_one_serializes() {
        let delay = Duration::from_millis(20);
        let operations = (0..4).map(|n| async move {
            sleep(delay).await;
            n
        });

        let start = Instant::now();
        let order: Vec<usize> = limit_concurrency_iter(operations, Some(1))
            .map(|done| done.started)
            .collect()
            .await;

        assert!(start.elapsed() >= delay * 4);
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_completion_order() {
        let operations = [30u64, 10, 20].into_iter().map(|ms| async move {
            sleep(Duration::from_millis(ms)).await;
            ms
        });

        let completed: Vec<Completed<u64>> =
            limit_concurrency_iter(operations, Some(3)).collect().await;

        assert_eq!(
            completed,
            vec![
                Completed { started: 1, value: 10 },
                Completed { started: 2, value: 20 },
                Completed { started: 0, value: 30 },
            ]
        );
    }

    #[test]
    fn test_limit_resolution() {
        let ops = || stream::iter(Vec::<future::Ready<()>>::new());

        assert_eq!(LimitConcurrency::new(ops(), Some(0)).limit(), 1);
        assert_eq!(LimitConcurrency::new(ops(), Some(7)).limit(), 7);
        assert_eq!(LimitConcurrency::new(ops(), None).limit(), default_limit());
        assert!(default_limit() >= 1);
    }
}
