// src/dag/queue.rs

//! Dependency-aware task queue.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::dag::dependencies::{compute_task_dependencies, TaskDependencies};
use crate::dag::graph::EntryPointGraph;
use crate::dag::priority::sort_by_priority;
use crate::dag::task::{Task, TaskId};
use crate::errors::{Result, TaskherdError};

/// Internal per-task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    /// Not yet handed out; may or may not be blocked.
    Queued,
    /// Handed out by `get_next_task` and not yet reported back.
    InProgress,
    Completed,
    Failed,
    /// Never run because a task it depends on failed.
    Skipped,
}

/// Public, read-only view of a task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting on at least one incomplete dependency.
    Blocked,
    /// Assignable.
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Tracks which tasks are queued, in progress, and finished, and hands out
/// the highest-priority task whose dependencies have all completed.
///
/// Mutated only through [`TaskQueue::get_next_task`],
/// [`TaskQueue::mark_task_completed`] and [`TaskQueue::mark_as_failed`].
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    dependencies: TaskDependencies,
    /// Remaining incomplete dependencies per task; tasks with none are absent.
    blocked_by: BTreeMap<TaskId, BTreeSet<TaskId>>,
    /// Queued tasks, highest priority first.
    queued: Vec<TaskId>,
    states: Vec<TaskState>,
}

impl TaskQueue {
    /// Build a queue from a topologically ordered task list and the
    /// entry-point graph.
    pub fn new(tasks: Vec<Task>, graph: &EntryPointGraph) -> Result<Self> {
        let dependencies = compute_task_dependencies(&tasks, graph)?;
        Self::from_parts(tasks, dependencies)
    }

    /// Build a queue from a precomputed dependents map.
    pub fn from_parts(tasks: Vec<Task>, dependencies: TaskDependencies) -> Result<Self> {
        let mut targets = HashSet::new();
        for task in &tasks {
            let (entry_point, format) = task.target();
            if !targets.insert((entry_point.to_path_buf(), format.to_string())) {
                return Err(TaskherdError::DuplicateTaskTarget(task.to_string()));
            }
        }

        for (dependency, dependents) in dependencies.iter() {
            if let Some(unknown) = std::iter::once(dependency)
                .chain(dependents.iter().copied())
                .find(|id| id.0 >= tasks.len())
            {
                return Err(TaskherdError::ConfigError(format!(
                    "dependency map refers to unknown task {unknown} (only {} tasks)",
                    tasks.len()
                )));
            }
        }

        let ids: Vec<TaskId> = (0..tasks.len()).map(TaskId).collect();
        let queued = sort_by_priority(&ids, &dependencies);
        let blocked_by = dependencies.blocked_by();
        let states = vec![TaskState::Queued; tasks.len()];

        debug!(
            tasks = tasks.len(),
            blocked = blocked_by.len(),
            "task queue created"
        );

        Ok(Self {
            tasks,
            dependencies,
            blocked_by,
            queued,
            states,
        })
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn dependencies(&self) -> &TaskDependencies {
        &self.dependencies
    }

    /// Hand out the highest-priority task whose dependencies have all
    /// completed, moving it to in-progress. `None` means nothing is assignable
    /// right now, even if unfinished work remains.
    pub fn get_next_task(&mut self) -> Option<TaskId> {
        let pos = self
            .queued
            .iter()
            .position(|id| !self.blocked_by.contains_key(id))?;
        let id = self.queued.remove(pos);
        self.states[id.0] = TaskState::InProgress;
        debug!(task = %self.tasks[id.0], "task handed out");
        Some(id)
    }

    /// Mark an in-progress task as completed, unblocking its dependents.
    pub fn mark_task_completed(&mut self, id: TaskId) -> Result<()> {
        self.expect_in_progress(id, "completed")?;
        self.states[id.0] = TaskState::Completed;

        if let Some(dependents) = self.dependencies.dependents_of(id) {
            for dependent in dependents {
                if let Some(blockers) = self.blocked_by.get_mut(dependent) {
                    blockers.remove(&id);
                    if blockers.is_empty() {
                        self.blocked_by.remove(dependent);
                    }
                }
            }
        }

        debug!(task = %self.tasks[id.0], "task completed");
        Ok(())
    }

    /// Mark an in-progress task as failed. Every task that depends on it,
    /// directly or transitively, can never run and is skipped; the skipped
    /// tasks are returned.
    pub fn mark_as_failed(&mut self, id: TaskId) -> Result<Vec<TaskId>> {
        self.expect_in_progress(id, "failed")?;
        self.states[id.0] = TaskState::Failed;

        let mut skipped = Vec::new();
        for dependent in self.dependencies.transitive_dependents(id) {
            if self.states[dependent.0] == TaskState::Queued {
                self.states[dependent.0] = TaskState::Skipped;
                warn!(
                    task = %self.tasks[dependent.0],
                    failed = %self.tasks[id.0],
                    "skipping task because a dependency failed"
                );
                skipped.push(dependent);
            }
        }

        let states = &self.states;
        self.queued.retain(|t| states[t.0] == TaskState::Queued);

        Ok(skipped)
    }

    /// True once every task is completed, failed or skipped.
    pub fn all_tasks_completed(&self) -> bool {
        self.states.iter().all(|s| {
            matches!(
                s,
                TaskState::Completed | TaskState::Failed | TaskState::Skipped
            )
        })
    }

    pub fn status(&self, id: TaskId) -> TaskStatus {
        match self.states[id.0] {
            TaskState::Queued if self.blocked_by.contains_key(&id) => TaskStatus::Blocked,
            TaskState::Queued => TaskStatus::Pending,
            TaskState::InProgress => TaskStatus::InProgress,
            TaskState::Completed => TaskStatus::Completed,
            TaskState::Failed => TaskStatus::Failed,
            TaskState::Skipped => TaskStatus::Skipped,
        }
    }

    pub fn in_progress(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == TaskState::InProgress)
            .map(|(i, _)| TaskId(i))
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress().count()
    }

    /// Tasks not yet handed out, blocked or not.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Incomplete dependencies of `id` (empty if it is assignable).
    pub fn blocked_by(&self, id: TaskId) -> Vec<TaskId> {
        self.blocked_by
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn expect_in_progress(&self, id: TaskId, target: &str) -> Result<()> {
        match self.states.get(id.0) {
            Some(TaskState::InProgress) => Ok(()),
            Some(state) => Err(TaskherdError::InvalidTaskTransition(format!(
                "trying to mark task {} as {target} while it is {state:?}",
                self.tasks[id.0]
            ))),
            None => Err(TaskherdError::InvalidTaskTransition(format!(
                "trying to mark unknown task {id} as {target}"
            ))),
        }
    }
}

impl fmt::Display for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TaskQueue")?;
        writeln!(f, "  All tasks completed: {}", self.all_tasks_completed())?;
        writeln!(f, "  Prioritized queue ({}):", self.queued.len())?;
        for id in &self.queued {
            let blockers = self.blocked_by(*id);
            if blockers.is_empty() {
                writeln!(f, "    - {}", self.tasks[id.0])?;
            } else {
                let names: Vec<String> = blockers.iter().map(|b| self.tasks[b.0].to_string()).collect();
                writeln!(f, "    - {} (blocked by: {})", self.tasks[id.0], names.join(", "))?;
            }
        }
        let in_progress: Vec<TaskId> = self.in_progress().collect();
        write!(f, "  In-progress tasks ({}):", in_progress.len())?;
        for id in in_progress {
            write!(f, "\n    - {}", self.tasks[id.0])?;
        }
        Ok(())
    }
}
