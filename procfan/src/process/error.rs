//! Errors raised while launching and draining a child process.
//!
//! A nonzero exit code is not an error: it is returned to the caller as-is.

use std::io;

use thiserror::Error;

/// Which output channel of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of a process operation.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// An argument vector with no program in it.
    #[error("cannot run an empty command line")]
    EmptyCommand,

    /// The child could not be started at all (missing executable, permission
    /// denied, bad working directory). No exit code exists.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading one of the child's output pipes failed.
    #[error("failed to read {stream} of `{program}`: {source}")]
    Read {
        program: String,
        stream: OutputStream,
        #[source]
        source: io::Error,
    },

    /// Waiting for the child to exit failed.
    #[error("failed to wait for `{program}` to exit: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The private runtime for a blocking call could not be built.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl ProcessError {
    /// Whether the process never started.
    pub const fn is_launch_failure(&self) -> bool {
        matches!(self, Self::Launch { .. } | Self::EmptyCommand)
    }
}

/// Shorthand for results of process operations.
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;
