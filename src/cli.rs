// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskrig`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskrig",
    version,
    about = "Run tasks in containers, with their dependencies.",
    long_about = None
)]
pub struct CliArgs {
    /// Task to run.
    #[arg(value_name = "TASK", required_unless_present = "list_tasks")]
    pub task: Option<String>,

    /// Path to the config file (TOML).
    ///
    /// Default: `taskrig.toml` in the current working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum number of capped steps (builds, pulls, creates, ...) to run
    /// at once. Overrides `max_parallelism` from the config file.
    #[arg(long, value_name = "N", value_parser = parse_parallelism)]
    pub max_parallelism: Option<usize>,

    /// Leave containers and networks in place if the task fails.
    #[arg(long)]
    pub no_cleanup_after_failure: bool,

    /// Leave containers and networks in place if the task succeeds.
    #[arg(long)]
    pub no_cleanup_after_success: bool,

    /// Attach containers to this existing network instead of creating one.
    #[arg(long, value_name = "NETWORK")]
    pub use_network: Option<String>,

    /// Run only the named task, not its prerequisites.
    #[arg(long)]
    pub skip_prerequisites: bool,

    /// Also write every event as JSON lines to this file.
    #[arg(long, value_name = "PATH")]
    pub event_log: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKRIG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution plan, but don't touch the runtime.
    #[arg(long)]
    pub dry_run: bool,

    /// List the tasks in the config file and exit.
    #[arg(long)]
    pub list_tasks: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_parallelism(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
