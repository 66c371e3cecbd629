//! Bounded-concurrency scheduling of async work.
//!
//! [`limit_concurrency`] drives a (possibly unbounded) stream of futures
//! through a fixed-size window on the consumer's task.
//! [`limit_concurrency_spawned`] does the same with each future running as
//! its own tokio task, and [`map_unordered`] builds on it from a sequence of
//! items and an async transform.

mod limit;
mod map;
mod spawned;

pub use limit::{
    default_limit, limit_concurrency, limit_concurrency_iter, Completed, LimitConcurrency,
    FALLBACK_LIMIT,
};
pub use map::{map_unordered, map_unordered_iter};
pub use spawned::{limit_concurrency_spawned, Spawned};
