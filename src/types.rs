// src/types.rs

use std::str::FromStr;
use serde::Deserialize;

/// What to do when a task reports [`TaskOutcome::Failed`](crate::engine::TaskOutcome).
///
/// - `Abort`: stop the whole run with an error naming the failed task
///   (default behaviour).
/// - `Continue`: log the failure, skip everything that depends on the failed
///   task and keep processing the rest of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Abort,
    Continue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

/// Parses the `--on-failure` flag; same spellings as the plan file.
impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "invalid on_failure: {other} (expected \"abort\" or \"continue\")"
            )),
        }
    }
}

/// How worker processes are hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// One child OS process per worker, talking JSON lines over stdio.
    Process,
    /// One Tokio task per worker inside the master process.
    Task,
}

impl Default for WorkerMode {
    fn default() -> Self {
        WorkerMode::Process
    }
}
