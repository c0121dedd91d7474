// src/dag/priority.rs

use std::cmp::Reverse;

use crate::dag::dependencies::TaskDependencies;
use crate::dag::task::TaskId;

/// Order tasks so that those unblocking the most dependents come first.
///
/// Priority is the number of direct dependents. The sort is stable, so tasks
/// with equal priority keep their input order.
pub fn sort_by_priority(tasks: &[TaskId], dependencies: &TaskDependencies) -> Vec<TaskId> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by_key(|task| Reverse(dependencies.dependent_count(*task)));
    sorted
}
