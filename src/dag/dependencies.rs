// src/dag/dependencies.rs

//! Task-level dependency analysis.
//!
//! Only tasks that produce type declarations can be depended upon. A task
//! depends on the declarations task of its own entry-point and on the
//! declarations tasks of every entry-point its entry-point (transitively)
//! depends on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::debug;

use crate::dag::graph::EntryPointGraph;
use crate::dag::task::{Task, TaskId};
use crate::errors::{Result, TaskherdError};

/// Dependents map: task -> tasks that cannot start before it completes.
///
/// Immutable after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDependencies {
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl TaskDependencies {
    /// Build from explicit edges `(dependency, dependent)`.
    pub fn from_edges(edges: impl IntoIterator<Item = (TaskId, TaskId)>) -> Self {
        let mut deps = Self::default();
        for (dependency, dependent) in edges {
            deps.add(dependency, dependent);
        }
        deps
    }

    fn add(&mut self, dependency: TaskId, dependent: TaskId) {
        self.dependents.entry(dependency).or_default().insert(dependent);
    }

    /// Direct dependents of `task`, if it has any.
    pub fn dependents_of(&self, task: TaskId) -> Option<&BTreeSet<TaskId>> {
        self.dependents.get(&task)
    }

    pub fn dependent_count(&self, task: TaskId) -> usize {
        self.dependents.get(&task).map_or(0, BTreeSet::len)
    }

    /// Every task reachable through the dependents relation, excluding `task`.
    pub fn transitive_dependents(&self, task: TaskId) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<TaskId> = self
            .dependents_of(task)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default();

        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(more) = self.dependents_of(next) {
                stack.extend(more.iter().copied());
            }
        }
        seen
    }

    /// Inverse view: task -> tasks it is blocked by. Tasks with no
    /// dependencies are absent.
    pub fn blocked_by(&self) -> BTreeMap<TaskId, BTreeSet<TaskId>> {
        let mut blocked: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
        for (dependency, dependents) in &self.dependents {
            for dependent in dependents {
                blocked.entry(*dependent).or_default().insert(*dependency);
            }
        }
        blocked
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &BTreeSet<TaskId>)> {
        self.dependents.iter().map(|(k, v)| (*k, v))
    }
}

/// Compute the dependents map for a topologically ordered task list.
///
/// `tasks` must list the declarations task of an entry-point before any task
/// of an entry-point that depends on it. `TaskId(i)` refers to `tasks[i]`.
pub fn compute_task_dependencies(tasks: &[Task], graph: &EntryPointGraph) -> Result<TaskDependencies> {
    let mut dependencies = TaskDependencies::default();
    // Entry-point id -> the declarations task seen for it so far.
    let mut candidates: HashMap<&Path, TaskId> = HashMap::new();

    for (idx, task) in tasks.iter().enumerate() {
        let id = TaskId(idx);
        let entry_point = task.entry_point.id();

        for dep in graph.dependencies_of(entry_point) {
            if let Some(&dependency) = candidates.get(dep.as_path()) {
                dependencies.add(dependency, id);
            }
        }

        if task.process_dts {
            if let Some(&other) = candidates.get(entry_point) {
                return Err(TaskherdError::DuplicateTypingsTask {
                    entry_point: entry_point.display().to_string(),
                    first: tasks[other.0].to_string(),
                    second: task.to_string(),
                });
            }
            candidates.insert(entry_point, id);
        } else if let Some(&typings_task) = candidates.get(entry_point) {
            dependencies.add(typings_task, id);
        }
    }

    debug!(
        tasks = tasks.len(),
        dependency_tasks = dependencies.dependents.len(),
        "computed task dependencies"
    );

    Ok(dependencies)
}
