// src/logging.rs

//! Logging setup for `taskherd` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TASKHERD_LOG` environment variable, read as `EnvFilter` directives
//!    (e.g. "debug" or "info,taskherd::engine=trace")
//! 3. default to `info`
//!
//! Logs always go to STDERR: a process worker's stdout carries the
//! master/worker protocol. Worker processes inherit the master's stderr, and
//! the `--log-level` flag and `TASKHERD_LOG` with it, so their lines are
//! interleaved with the master's; [`worker_span`] tells them apart.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;
use crate::engine::WorkerId;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "TASKHERD_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();

    fmt()
        .with_env_filter(log_filter(cli_level, env.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("initialising logging: {e}"))?;

    Ok(())
}

/// Filter for a CLI level and the raw value of [`LOG_ENV`].
///
/// A value that does not parse as directives falls back to `info`.
pub fn log_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }

    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Span wrapping everything a worker process logs.
pub fn worker_span(worker: WorkerId) -> tracing::Span {
    tracing::info_span!("worker", id = %worker)
}
