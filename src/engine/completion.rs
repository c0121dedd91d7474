// src/engine/completion.rs

//! Routing of terminal task outcomes to side-effecting handlers.
//!
//! [`CompletionRouter`] holds exactly one handler per [`TaskOutcome`]
//! variant, so a missing handler is a compile error rather than a runtime
//! surprise.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::dag::task::TYPINGS_PROPERTY;
use crate::dag::{EntryPointFormat, TaskId, TaskQueue};
use crate::errors::{Result, TaskherdError};
use crate::persist::{processed_changes, StateWriter};
use crate::types::FailurePolicy;

/// Terminal outcome reported by a worker for its assigned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Every requested output, including type declarations, was produced.
    AllFormatsCompiled,
    /// The format compiled but type declarations were not produced.
    CompiledWithoutTypings,
    Failed,
}

/// Side effect run when a task reaches a given outcome.
pub trait TaskCompletedHandler: Send {
    fn handle(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<()>;
}

impl<F> TaskCompletedHandler for F
where
    F: Fn(&mut TaskQueue, TaskId, TaskOutcome, Option<&str>) -> Result<()> + Send,
{
    fn handle(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        self(queue, task, outcome, message)
    }
}

/// Persist that the task's format properties (and, when it produced them,
/// its type declarations) are now built.
#[derive(Debug, Clone)]
pub struct MarkAsProcessed {
    writer: Arc<dyn StateWriter>,
}

impl MarkAsProcessed {
    pub fn new(writer: Arc<dyn StateWriter>) -> Self {
        Self { writer }
    }
}

impl TaskCompletedHandler for MarkAsProcessed {
    fn handle(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        outcome: TaskOutcome,
        _message: Option<&str>,
    ) -> Result<()> {
        let task = queue.task(task);
        let mut props = task.format_properties_to_mark_as_processed.clone();
        if task.process_dts && outcome == TaskOutcome::AllFormatsCompiled {
            props.push(TYPINGS_PROPERTY.to_string());
        }

        debug!(task = %task, ?props, "marking properties as processed");
        self.writer
            .write_changes(&processed_changes(&props), &task.entry_point.manifest_path())
    }
}

/// Abort the whole run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrowOnFailure;

impl TaskCompletedHandler for ThrowOnFailure {
    fn handle(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        _outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        let task = queue.task(task);
        Err(TaskherdError::TaskFailed {
            entry_point: task.entry_point.name.clone(),
            format_property: task.format_property.clone(),
            format: estimated_format(&task.format_property),
            message: message.unwrap_or("no details").to_string(),
        })
    }
}

/// Record the failure in the queue and keep going.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndContinue;

impl TaskCompletedHandler for LogAndContinue {
    fn handle(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        _outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        let skipped = queue.mark_as_failed(task)?;
        let task = queue.task(task);
        error!(
            entry_point = %task.entry_point.name,
            format_property = %task.format_property,
            format = %estimated_format(&task.format_property),
            skipped = skipped.len(),
            "failed to compile entry-point: {}",
            message.unwrap_or("no details")
        );
        Ok(())
    }
}

fn estimated_format(format_property: &str) -> String {
    EntryPointFormat::estimate(format_property)
        .map(|f| f.to_string())
        .unwrap_or_else(|| "unknown format".to_string())
}

/// Total mapping from [`TaskOutcome`] to handler.
pub struct CompletionRouter {
    pub on_all_formats_compiled: Box<dyn TaskCompletedHandler>,
    pub on_compiled_without_typings: Box<dyn TaskCompletedHandler>,
    pub on_failed: Box<dyn TaskCompletedHandler>,
}

impl fmt::Debug for CompletionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRouter").finish_non_exhaustive()
    }
}

impl CompletionRouter {
    /// Standard routing: successes are persisted, failures follow `policy`.
    pub fn for_policy(policy: FailurePolicy, writer: Arc<dyn StateWriter>) -> Self {
        let on_failed: Box<dyn TaskCompletedHandler> = match policy {
            FailurePolicy::Abort => Box::new(ThrowOnFailure),
            FailurePolicy::Continue => Box::new(LogAndContinue),
        };

        Self {
            on_all_formats_compiled: Box::new(MarkAsProcessed::new(Arc::clone(&writer))),
            on_compiled_without_typings: Box::new(MarkAsProcessed::new(writer)),
            on_failed,
        }
    }

    pub fn dispatch(
        &self,
        queue: &mut TaskQueue,
        task: TaskId,
        outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        let handler = match outcome {
            TaskOutcome::AllFormatsCompiled => &self.on_all_formats_compiled,
            TaskOutcome::CompiledWithoutTypings => &self.on_compiled_without_typings,
            TaskOutcome::Failed => &self.on_failed,
        };
        handler.handle(queue, task, outcome, message)
    }
}
