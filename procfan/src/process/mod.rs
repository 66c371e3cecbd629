//! Child processes with live, line-by-line output handling.
//!
//! This module launches a command and drains its stdout and stderr
//! concurrently, dispatching each line to a [`LineSink`] while the process
//! runs.

mod error;
mod sink;
mod spawn;

pub use error::{OutputStream, ProcessError, Result};
pub use sink::{
    decode_line, LineCallback, LineSink, LogSink, OutputHandler, OutputOptions, OUTPUT_TARGET,
};
pub use spawn::{
    capture, execute, execute_blocking, execute_logged, exit_code, ProcessOptions,
};
