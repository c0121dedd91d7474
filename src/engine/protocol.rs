// src/engine/protocol.rs

//! Messages exchanged between the master and its workers.
//!
//! Process workers carry them as one JSON object per line; in-process
//! workers pass them over channels unchanged.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dag::Task;
use crate::engine::completion::TaskOutcome;
use crate::errors::Result;
use crate::persist::StateChange;

/// Master -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageToWorker {
    ProcessTask { task: Task },
}

/// Worker -> master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageFromWorker {
    /// The assigned task reached a terminal outcome.
    TaskCompleted {
        outcome: TaskOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Persist changes on behalf of the assigned task.
    UpdatePersistentState {
        changes: Vec<StateChange>,
        target_path: PathBuf,
    },
    /// The compile function failed unexpectedly.
    Error { detail: String },
}

/// Encode a message as a single newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}
