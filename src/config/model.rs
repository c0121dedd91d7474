// src/config/model.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dag::{EntryPoint, EntryPointGraph, Task};
use crate::errors::Result;
use crate::types::{FailurePolicy, WorkerMode};

/// Environment variable overriding `[cluster].max_workers`.
pub const MAX_WORKERS_ENV: &str = "TASKHERD_MAX_WORKERS";

/// Plan file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [cluster]
/// max_workers = 4
/// on_failure = "continue"
///
/// [compile]
/// cmd = "tsc -p {path} --module {format}"
///
/// [[entry_point]]
/// name = "core"
/// path = "packages/core"
/// formats = ["fesm2015", "main"]
///
/// [[entry_point]]
/// name = "common"
/// path = "packages/common"
/// formats = ["fesm2015"]
/// dependencies = ["core"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlanFile {
    #[serde(default)]
    pub cluster: ClusterSection,

    pub compile: CompileSection,

    /// All `[[entry_point]]` tables, in file order.
    #[serde(default, rename = "entry_point")]
    pub entry_points: Vec<EntryPointConfig>,
}

/// Validated plan. Only obtainable through `PlanFile::try_from(RawPlanFile)`
/// (or `new_unchecked` in code that has already validated).
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub cluster: ClusterSection,
    pub compile: CompileSection,
    pub entry_points: Vec<EntryPointConfig>,
}

/// `[cluster]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    /// Worker-count ceiling. Defaults to one less than the available
    /// parallelism, and never below 1.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// `"abort"` (default) or `"continue"`.
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// `"process"` (default) or `"task"`.
    #[serde(default)]
    pub mode: WorkerMode,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            on_failure: FailurePolicy::default(),
            mode: WorkerMode::default(),
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Worker ceiling from `TASKHERD_MAX_WORKERS`, if set to a number.
pub fn max_workers_from_env() -> Option<usize> {
    std::env::var(MAX_WORKERS_ENV)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// `[compile]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileSection {
    /// Shell command template; see [`crate::compile`] for placeholders.
    pub cmd: String,
}

/// One `[[entry_point]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointConfig {
    pub name: String,
    pub path: PathBuf,

    /// Format properties to compile, one task each.
    pub formats: Vec<String>,

    /// Whether the first format's task also produces type declarations.
    #[serde(default = "default_typings")]
    pub typings: bool,

    /// Names of entry-points whose declarations this one needs.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_typings() -> bool {
    true
}

impl EntryPointConfig {
    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint::new(self.name.clone(), self.path.clone())
    }
}

impl PlanFile {
    pub fn new_unchecked(
        cluster: ClusterSection,
        compile: CompileSection,
        entry_points: Vec<EntryPointConfig>,
    ) -> Self {
        Self {
            cluster,
            compile,
            entry_points,
        }
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPointConfig> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// Entry-point graph keyed by path, with edges for `dependencies`.
    pub fn graph(&self) -> EntryPointGraph {
        let mut graph = EntryPointGraph::new();
        for ep in &self.entry_points {
            graph.add_entry_point(ep.path.as_path());
            for dep in &ep.dependencies {
                if let Some(dep) = self.entry_point(dep) {
                    graph.add_dependency(ep.path.as_path(), dep.path.as_path());
                }
            }
        }
        graph
    }

    /// One task per (entry-point, format), with dependencies' tasks first.
    ///
    /// When an entry-point has `typings = true`, the task for its first
    /// format is the one that produces declarations.
    pub fn build_tasks(&self) -> Result<Vec<Task>> {
        let by_id: HashMap<&Path, &EntryPointConfig> = self
            .entry_points
            .iter()
            .map(|ep| (ep.path.as_path(), ep))
            .collect();

        let mut tasks = Vec::new();
        for id in self.graph().topological_order()? {
            let Some(ep) = by_id.get(id.as_path()) else {
                continue;
            };
            for (i, format) in ep.formats.iter().enumerate() {
                tasks.push(Task::new(ep.entry_point(), format.clone(), ep.typings && i == 0));
            }
        }
        Ok(tasks)
    }
}
