// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::engine::WorkerId;

#[derive(Error, Debug)]
pub enum TaskherdError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Cycle detected in entry-point graph: {0}")]
    DagCycle(String),

    #[error("Invariant violated: multiple tasks target the same entry-point and format: {0}")]
    DuplicateTaskTarget(String),

    #[error(
        "Invariant violated: multiple tasks are assigned generating typings for '{entry_point}':\n  - {first}\n  - {second}"
    )]
    DuplicateTypingsTask {
        entry_point: String,
        first: String,
        second: String,
    },

    #[error("Invalid task transition: {0}")]
    InvalidTaskTransition(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Worker #{worker} crashed while processing task {task}")]
    WorkerCrashed { worker: WorkerId, task: String },

    #[error("Error on worker #{worker}: {detail}")]
    WorkerError { worker: WorkerId, detail: String },

    #[error(
        "Received state update from worker #{worker} for '{received}', but was expecting '{expected}' (based on task assignment)"
    )]
    UnexpectedStateTarget {
        worker: WorkerId,
        received: String,
        expected: String,
    },

    #[error(
        "There are still unprocessed tasks in the queue and no tasks are currently in progress, yet the queue did not return any available tasks: {0}"
    )]
    Deadlock(String),

    #[error("Failed to compile entry-point {entry_point} ({format_property} as {format}): {message}")]
    TaskFailed {
        entry_point: String,
        format_property: String,
        format: String,
        message: String,
    },

    #[error("Run interrupted before all tasks completed")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TaskherdError>;
