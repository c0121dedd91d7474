// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `taskherd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskherd",
    version,
    about = "Compile package entry-points across a pool of worker processes.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKHERD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Compile every entry-point listed in the plan.
    Run(RunArgs),

    /// Serve tasks over stdin/stdout. Spawned by `run`; not for direct use.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the plan file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Taskherd.toml")]
    pub plan: String,

    /// Worker-count ceiling; overrides `TASKHERD_MAX_WORKERS` and the plan.
    ///
    /// `1` processes every task in this process without spawning workers.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// What to do when a task fails (abort, continue); overrides
    /// `cluster.on_failure` from the plan.
    #[arg(long, value_name = "POLICY")]
    pub on_failure: Option<FailurePolicy>,

    /// Run workers as tasks inside this process instead of child processes.
    #[arg(long)]
    pub in_process: bool,

    /// Parse + validate, print the task queue, but don't compile anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Plan file providing the compile command.
    #[arg(long, value_name = "PATH")]
    pub plan: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
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
