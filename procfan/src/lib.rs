//! Procfan - bounded-concurrency async work and live process output capture.
//!
//! Two building blocks:
//! - [`concurrency`]: run a (possibly unbounded) stream of futures with at
//!   most N in flight, yielding results as they complete
//! - [`process`]: run a command and hand each line of its stdout and stderr
//!   to a callback or a logging destination while it runs
//!
//! They compose: mapping [`process::execute_logged`] over a list of commands
//! with [`concurrency::map_unordered_iter`] runs a bounded batch of processes.

pub mod concurrency;
pub mod process;

#[cfg(test)]
mod testing;

pub use concurrency::{
    limit_concurrency, limit_concurrency_spawned, map_unordered, map_unordered_iter, Completed,
};
pub use process::{execute, execute_blocking, execute_logged, ProcessError, ProcessOptions};
