//! Procfan - run commands with bounded concurrency, logging their output live.
//!
//! `procfan run` runs a single command and mirrors its exit code.
//! `procfan batch` reads command lines and runs them a bounded number at a
//! time, reporting each one as it finishes.

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let code = execute(cli).await?;
    std::process::exit(shell_status(code))
}

/// Child exit code as a shell would report it: death by signal N is `128 + N`.
const fn shell_status(code: i32) -> i32 {
    if code < 0 {
        128 - code
    } else {
        code
    }
}
