//! Process spawning with live, line-by-line handling of both output streams.
//!
//! Provides:
//! - Builder-style launch options (arguments, working directory, environment)
//! - Concurrent draining of stdout and stderr into independent line sinks
//! - Exit code pass-through; a nonzero code is not an error
//! - A blocking entry point for synchronous callers

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::error::{OutputStream, ProcessError, Result};
use super::sink::{LineSink, OutputOptions};

/// Configuration options for launching a process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Variables set for the child, on top of what it inherits.
    pub env: HashMap<String, String>,

    /// Inherited variables the child must not see.
    pub unset: Vec<String>,

    /// Start the child from an empty environment; only `env` is passed.
    pub clear_env: bool,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build options from a full argument vector, program first.
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(ProcessError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        Ok(Self::new(program).args(argv))
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set every `(key, value)` pair; later pairs win.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Hide an inherited variable from the child.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    /// Do not inherit the parent's environment.
    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    /// Name used for the default logging destination: the program's file
    /// name, so `/usr/bin/make` logs as `make`.
    pub fn default_destination(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.program)
    }

    /// The command line, space-separated, for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if self.clear_env {
            cmd.env_clear();
        } else {
            for key in &self.unset {
                cmd.env_remove(key);
            }
        }
        cmd.envs(&self.env);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // Dropping the capture future (e.g. on an external timeout) takes the child with it.
        cmd.kill_on_drop(true);

        cmd
    }
}

/// Run a process, handing each line of its output to the matching sink as
/// it appears, and return its exit code.
///
/// Both streams are read concurrently with waiting for the exit, all on the
/// calling task. The call returns once both streams have reached end of file
/// and the exit code is known. Lines within a stream keep their order; there
/// is no ordering between the two streams.
///
/// A child that cannot be started fails with [`ProcessError::Launch`] before
/// any line is read. A nonzero exit code is returned, not raised.
pub async fn capture(
    options: &ProcessOptions,
    stdout: &mut LineSink,
    stderr: &mut LineSink,
) -> Result<i32> {
    let mut child = options
        .command()
        .spawn()
        .map_err(|source| ProcessError::Launch {
            program: options.program.clone(),
            source,
        })?;

    debug!(program = %options.program, pid = child.id(), "Process started");

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let (stdout_lines, stderr_lines, status) = tokio::join!(
        drain_lines(stdout_pipe, stdout),
        drain_lines(stderr_pipe, stderr),
        child.wait(),
    );

    let stdout_lines =
        stdout_lines.map_err(|source| read_failure(options, OutputStream::Stdout, source))?;
    let stderr_lines =
        stderr_lines.map_err(|source| read_failure(options, OutputStream::Stderr, source))?;
    let status = status.map_err(|source| ProcessError::Wait {
        program: options.program.clone(),
        source,
    })?;

    let code = exit_code(status);
    debug!(
        program = %options.program,
        code,
        stdout_lines,
        stderr_lines,
        "Process exited"
    );

    Ok(code)
}

/// Run a process with the given output handling and return its exit code.
///
/// Streams without an explicit handler log to a destination named after the
/// program (see [`ProcessOptions::default_destination`]).
///
/// # Example
///
/// ```rust,no_run
/// use procfan::process::{execute, OutputOptions, ProcessOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let code = execute(
///         &ProcessOptions::new("make").arg("-j4").working_dir("/tmp/project"),
///         OutputOptions::stdout().prefix("make: "),
///         OutputOptions::stderr().callback(|line| eprintln!("!! {line}")),
///     )
///     .await?;
///
///     println!("Exit code: {code}");
///     Ok(())
/// }
/// ```
pub async fn execute(
    options: &ProcessOptions,
    stdout: OutputOptions,
    stderr: OutputOptions,
) -> Result<i32> {
    let destination = options.default_destination();
    let mut stdout = stdout.into_sink(destination);
    let mut stderr = stderr.into_sink(destination);
    capture(options, &mut stdout, &mut stderr).await
}

/// Run a process, logging stdout at INFO and stderr at WARN.
///
/// Takes the options by value so it can be handed straight to
/// [`map_unordered`](crate::concurrency::map_unordered).
pub async fn execute_logged(options: ProcessOptions) -> Result<i32> {
    execute(&options, OutputOptions::stdout(), OutputOptions::stderr()).await
}

/// Blocking form of [`execute`] for synchronous callers.
///
/// Drives the process on a private single-threaded runtime. Must not be
/// called from within an async runtime.
pub fn execute_blocking(
    options: &ProcessOptions,
    stdout: OutputOptions,
    stderr: OutputOptions,
) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ProcessError::Runtime)?;
    runtime.block_on(execute(options, stdout, stderr))
}

/// Exit code of a finished process.
///
/// A process killed by a signal reports the negated signal number; `-1` if
/// neither is available.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| terminating_signal(status).map_or(-1, |signal| -signal))
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Feed every line of `pipe` to `sink` until end of file.
///
/// A final line without a terminator is delivered as its own line.
async fn drain_lines<R>(pipe: Option<R>, sink: &mut LineSink) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(0);
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(count);
        }
        sink.line(&buf);
        count += 1;
    }
}

fn read_failure(options: &ProcessOptions, stream: OutputStream, source: io::Error) -> ProcessError {
    ProcessError::Read {
        program: options.program.clone(),
        stream,
        source,
    }
}
