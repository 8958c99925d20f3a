// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `stepdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stepdag",
    version,
    about = "Run a cached, resumable DAG of generation steps.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Stepdag.toml` in the current working directory, if present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STEPDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a new job.
    Run(RunArgs),

    /// Re-run a job, skipping steps that already succeeded.
    Resume(ResumeArgs),

    /// Print the event log of a job.
    Events(EventsArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// What the pipeline should build.
    #[arg(long, value_name = "TEXT")]
    pub task: String,

    #[arg(long, value_name = "NAME")]
    pub project: Option<String>,

    /// `<name>` or `<name>:<model>`.
    #[arg(long, value_name = "SELECTION")]
    pub backend: Option<String>,

    /// Maximum number of steps running at once.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Overall run timeout.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Parent directory of run directories.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Validate the pipeline and print its order, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ResumeArgs {
    pub job_id: String,

    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct EventsArgs {
    pub job_id: String,

    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Only events of this type, e.g. `step.failed`.
    #[arg(long = "type", value_name = "TYPE")]
    pub event_type: Option<String>,

    #[arg(long, value_name = "STEP")]
    pub step: Option<String>,

    /// INFO, WARN or ERROR.
    #[arg(long, value_name = "LEVEL")]
    pub level: Option<String>,
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

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
