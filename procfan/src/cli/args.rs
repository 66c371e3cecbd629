//! CLI argument definitions.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::Level;

/// Procfan - run commands with bounded concurrency and live output logging
#[derive(Parser, Debug)]
#[command(name = "procfan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Severities for the two output streams of a command.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Level for lines the command writes to stdout
    #[arg(long, default_value = "info")]
    pub stdout_level: Level,

    /// Level for lines the command writes to stderr
    #[arg(long, default_value = "warn")]
    pub stderr_level: Level,
}

/// Environment handed to the command(s).
#[derive(Args, Debug, Clone, Default)]
pub struct EnvArgs {
    /// Set a variable for the command (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub vars: Vec<(String, String)>,

    /// Hide an inherited variable from the command (repeatable)
    #[arg(long, value_name = "KEY")]
    pub unset: Vec<String>,

    /// Start from an empty environment; only --env variables are passed
    #[arg(long)]
    pub clear_env: bool,
}

fn parse_env_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{pair}`")),
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one command, logging its output as it appears, and exit with its code
    Run {
        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Log destination for the output (defaults to the program name)
        #[arg(long)]
        destination: Option<String>,

        /// Text prepended to every logged line
        #[arg(long, default_value = "")]
        prefix: String,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        env: EnvArgs,

        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Run command lines from a file or stdin, a bounded number at a time
    Batch {
        /// Maximum commands running at once (defaults to the CPU count)
        #[arg(short = 'j', long)]
        jobs: Option<NonZeroUsize>,

        /// Read command lines from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Shell that runs each line (as `SHELL -c LINE`)
        #[arg(long, default_value = "sh")]
        shell: String,

        /// Working directory for every command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Print one JSON object per finished command on stdout
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        env: EnvArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "procfan",
            "-v",
            "run",
            "--stderr-level",
            "error",
            "--",
            "ls",
            "-la",
        ]);

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run {
                command, output, ..
            } => {
                assert_eq!(command, vec!["ls", "-la"]);
                assert_eq!(output.stdout_level, Level::INFO);
                assert_eq!(output.stderr_level, Level::ERROR);
            }
            Commands::Batch { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_batch() {
        let cli = Cli::parse_from(["procfan", "batch", "-j", "3", "--json"]);

        match cli.command {
            Commands::Batch {
                jobs, json, shell, ..
            } => {
                assert_eq!(jobs.map(NonZeroUsize::get), Some(3));
                assert!(json);
                assert_eq!(shell, "sh");
            }
            Commands::Run { .. } => panic!("expected batch"),
        }
    }

    #[test]
    fn test_parse_env_flags() {
        let cli = Cli::parse_from([
            "procfan",
            "batch",
            "--env",
            "A=1",
            "--env",
            "EMPTY=",
            "--unset",
            "HOME",
            "--clear-env",
        ]);

        match cli.command {
            Commands::Batch { env, .. } => {
                assert_eq!(
                    env.vars,
                    vec![
                        ("A".to_string(), "1".to_string()),
                        ("EMPTY".to_string(), String::new())
                    ]
                );
                assert_eq!(env.unset, vec!["HOME"]);
                assert!(env.clear_env);
            }
            Commands::Run { .. } => panic!("expected batch"),
        }

        for bad in ["NOEQUALS", "=x"] {
            assert!(Cli::try_parse_from(["procfan", "run", "--env", bad, "--", "true"]).is_err());
        }
    }

    #[test]
    fn test_zero_jobs_rejected() {
        assert!(Cli::try_parse_from(["procfan", "batch", "-j", "0"]).is_err());
    }
}
