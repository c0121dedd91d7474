// src/persist.rs

//! Persisted per-entry-point state.
//!
//! The scheduler never decides *what* gets persisted; it only routes
//! [`StateChange`]s (from completion handlers, or from workers through the
//! side channel) to a [`StateWriter`].

use std::fmt::Debug;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::Result;
use crate::fs::FileSystem;

/// Key under which processed format properties are recorded.
pub const PROCESSED_MARKER: &str = "__processed_by_taskherd__";

/// Set the JSON value at `path` (a list of object keys) to `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub path: Vec<String>,
    pub value: Value,
}

impl StateChange {
    pub fn new(path: impl IntoIterator<Item = impl Into<String>>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }
}

/// Changes recording each of `properties` as processed by this version.
pub fn processed_changes<S: AsRef<str>>(properties: &[S]) -> Vec<StateChange> {
    properties
        .iter()
        .map(|prop| {
            StateChange::new(
                [PROCESSED_MARKER, prop.as_ref()],
                env!("CARGO_PKG_VERSION"),
            )
        })
        .collect()
}

/// External persistence collaborator.
pub trait StateWriter: Send + Sync + Debug {
    fn write_changes(&self, changes: &[StateChange], target: &Path) -> Result<()>;
}

/// Applies changes to a JSON document stored at `target`.
#[derive(Debug, Clone, Default)]
pub struct FsStateWriter<F: FileSystem> {
    fs: F,
}

impl<F: FileSystem> FsStateWriter<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

impl<F: FileSystem> StateWriter for FsStateWriter<F> {
    fn write_changes(&self, changes: &[StateChange], target: &Path) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut doc = if self.fs.exists(target) {
            let text = self.fs.read_to_string(target)?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing JSON state at {:?}", target))?
        } else {
            Value::Object(Map::new())
        };

        for change in changes {
            apply_change(&mut doc, change)
                .with_context(|| format!("applying change to {:?}", target))?;
        }

        let mut text = serde_json::to_string_pretty(&doc)?;
        text.push('\n');
        self.fs.write(target, text.as_bytes())?;

        debug!(target = ?target, changes = changes.len(), "persisted state changes");
        Ok(())
    }
}

fn apply_change(doc: &mut Value, change: &StateChange) -> anyhow::Result<()> {
    let Some((last, parents)) = change.path.split_last() else {
        return Err(anyhow!("empty property path"));
    };

    let mut current = doc;
    for key in parents {
        let obj = current
            .as_object_mut()
            .ok_or_else(|| anyhow!("property '{key}' is nested in a non-object value"))?;
        current = obj
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let obj = current
        .as_object_mut()
        .ok_or_else(|| anyhow!("property '{last}' is nested in a non-object value"))?;
    obj.insert(last.clone(), change.value.clone());
    Ok(())
}
