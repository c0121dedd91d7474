// src/dag/mod.rs

//! Task model, dependency analysis and the task queue.
//!
//! - [`task`] defines the task descriptors handed in by the caller.
//! - [`graph`] holds the entry-point dependency graph.
//! - [`dependencies`] derives task-level dependencies from that graph.
//! - [`priority`] orders tasks by how much work they unblock.
//! - [`queue`] tracks per-task state and decides what is assignable.

pub mod dependencies;
pub mod graph;
pub mod priority;
pub mod queue;
pub mod task;

pub use dependencies::{compute_task_dependencies, TaskDependencies};
pub use graph::EntryPointGraph;
pub use priority::sort_by_priority;
pub use queue::{TaskQueue, TaskStatus};
pub use task::{EntryPoint, EntryPointFormat, Task, TaskId};
