//! CLI command execution.

use std::future;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{error, info, warn};

use procfan::concurrency::map_unordered;
use procfan::process::{self, OutputOptions, ProcessOptions};

use super::args::{Cli, Commands, EnvArgs, OutputArgs};

/// Highest exit status `batch` reports; more failures than this still exit with it.
const MAX_FAILURE_STATUS: usize = 101;

/// Execute the parsed command line and return the process exit status.
pub async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            cwd,
            destination,
            prefix,
            output,
            env,
            command,
        } => {
            let mut options = ProcessOptions::from_argv(command)?;
            if let Some(dir) = cwd {
                options = options.working_dir(dir);
            }
            run_command(with_env(options, &env), destination, &prefix, &output).await
        }

        Commands::Batch {
            jobs,
            file,
            shell,
            cwd,
            json,
            output,
            env,
        } => {
            let settings = BatchSettings {
                limit: jobs.map(NonZeroUsize::get),
                shell,
                cwd,
                json,
                output,
                env,
            };
            let input: Box<dyn AsyncRead + Unpin + Send> = match file {
                Some(path) => {
                    let file = File::open(&path).await.with_context(|| {
                        format!("Failed to open command file {}", path.display())
                    })?;
                    Box::new(file)
                }
                None => Box::new(tokio::io::stdin()),
            };
            run_batch(input, settings).await
        }
    }
}

/// `procfan run`: one command, its exit code becomes ours.
async fn run_command(
    options: ProcessOptions,
    destination: Option<String>,
    prefix: &str,
    output: &OutputArgs,
) -> Result<i32> {
    let mut stdout = OutputOptions::stdout()
        .level(output.stdout_level)
        .prefix(prefix);
    let mut stderr = OutputOptions::stderr()
        .level(output.stderr_level)
        .prefix(prefix);
    if let Some(name) = destination {
        stdout = stdout.destination(name.clone());
        stderr = stderr.destination(name);
    }

    process::execute(&options, stdout, stderr)
        .await
        .with_context(|| format!("Failed to run `{}`", options.command_line()))
}

fn with_env(options: ProcessOptions, env: &EnvArgs) -> ProcessOptions {
    env.unset
        .iter()
        .fold(options, |options, key| options.unset(key))
        .envs(env.vars.iter().cloned())
        .clear_env(env.clear_env)
}

/// Settings shared by every job of a batch.
#[derive(Debug)]
struct BatchSettings {
    limit: Option<usize>,
    shell: String,
    cwd: Option<PathBuf>,
    json: bool,
    output: OutputArgs,
    env: EnvArgs,
}

/// Outcome of one batch job.
#[derive(Debug, Serialize)]
struct JobReport {
    /// One-based position of the command in the input.
    job: usize,
    command: String,
    /// Absent when the command could not be started or read.
    exit_code: Option<i32>,
    error: Option<String>,
    elapsed_ms: u64,
}

impl JobReport {
    const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// `procfan batch`: run every command line of `input` with bounded
/// concurrency. Returns the number of failed jobs, capped at
/// [`MAX_FAILURE_STATUS`].
///
/// Each job runs as its own task, so job output keeps flowing while reports
/// are being printed.
async fn run_batch<R>(input: R, settings: BatchSettings) -> Result<i32>
where
    R: AsyncRead + Unpin,
{
    let settings = Arc::new(settings);
    let jobs = command_lines(LinesStream::new(BufReader::new(input).lines())).enumerate();

    let mut reports = pin!(map_unordered(
        |(index, line)| run_job(index + 1, line, Arc::clone(&settings)),
        jobs,
        settings.limit,
    ));

    let mut total = 0usize;
    let mut failed = 0usize;
    while let Some(report) = reports.next().await {
        total += 1;
        if !report.succeeded() {
            failed += 1;
        }
        print_report(&report, settings.json)?;
    }

    if failed == 0 {
        info!("All {total} jobs succeeded");
    } else {
        warn!("{failed} of {total} jobs failed");
    }

    Ok(i32::try_from(failed.min(MAX_FAILURE_STATUS))?)
}

/// Keep lines that hold a command; stop after the first read error.
fn command_lines<S>(lines: S) -> impl Stream<Item = io::Result<String>>
where
    S: Stream<Item = io::Result<String>>,
{
    lines
        .scan(false, |failed, line| {
            if *failed {
                return future::ready(None);
            }
            *failed = line.is_err();
            future::ready(Some(line))
        })
        .filter(|line| {
            future::ready(match line {
                Ok(line) => is_command(line),
                Err(_) => true,
            })
        })
}

/// Blank lines and `#` comments are not commands.
fn is_command(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// Log destination for a command line: its first word.
fn job_destination<'a>(line: &'a str, shell: &'a str) -> &'a str {
    line.split_whitespace().next().unwrap_or(shell)
}

async fn run_job(job: usize, line: io::Result<String>, settings: Arc<BatchSettings>) -> JobReport {
    let started = Instant::now();

    let line = match line {
        Ok(line) => line,
        Err(e) => {
            return JobReport {
                job,
                command: String::new(),
                exit_code: None,
                error: Some(format!("failed to read command list: {e}")),
                elapsed_ms: 0,
            };
        }
    };

    let mut options = ProcessOptions::new(&settings.shell).arg("-c").arg(&line);
    if let Some(ref dir) = settings.cwd {
        options = options.working_dir(dir);
    }
    let options = with_env(options, &settings.env);

    let prefix = format!("[{job}] ");
    let destination = job_destination(&line, &settings.shell);
    let result = process::execute(
        &options,
        OutputOptions::stdout()
            .level(settings.output.stdout_level)
            .prefix(&prefix)
            .destination(destination),
        OutputOptions::stderr()
            .level(settings.output.stderr_level)
            .prefix(&prefix)
            .destination(destination),
    )
    .await;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(code) => JobReport {
            job,
            command: line,
            exit_code: Some(code),
            error: None,
            elapsed_ms,
        },
        Err(e) => JobReport {
            job,
            command: line,
            exit_code: None,
            error: Some(e.to_string()),
            elapsed_ms,
        },
    }
}

fn print_report(report: &JobReport, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(report).context("Failed to serialize job report")?;
        println!("{line}");
        return Ok(());
    }

    let JobReport {
        job,
        ref command,
        elapsed_ms,
        ..
    } = *report;
    match (report.exit_code, &report.error) {
        (Some(0), _) => info!(job, elapsed_ms, "`{command}` succeeded"),
        (Some(code), _) => warn!(job, elapsed_ms, code, "`{command}` exited with {code}"),
        (None, Some(error)) => error!(job, "{error}"),
        (None, None) => error!(job, "`{command}` finished without an exit code"),
    }
    Ok(())
}
