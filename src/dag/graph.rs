// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::errors::{Result, TaskherdError};

/// Dependency graph between entry-points, keyed by entry-point identity
/// (see [`EntryPoint::id`](crate::dag::EntryPoint::id)).
///
/// Edge direction: dependent -> dependency. For `pkg2` depending on `pkg1` we
/// add the edge `pkg2 -> pkg1`.
#[derive(Debug, Clone, Default)]
pub struct EntryPointGraph {
    graph: DiGraph<PathBuf, ()>,
    nodes: HashMap<PathBuf, NodeIndex>,
}

impl EntryPointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry-point node; adding the same id twice is a no-op.
    pub fn add_entry_point(&mut self, id: impl Into<PathBuf>) -> NodeIndex {
        let id = id.into();
        if let Some(idx) = self.nodes.get(&id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.nodes.insert(id, idx);
        idx
    }

    /// Record that `dependent` depends on `dependency`, adding missing nodes.
    pub fn add_dependency(&mut self, dependent: impl Into<PathBuf>, dependency: impl Into<PathBuf>) {
        let from = self.add_entry_point(dependent);
        let to = self.add_entry_point(dependency);
        self.graph.update_edge(from, to, ());
    }

    /// All entry-points `id` depends on, directly or transitively.
    ///
    /// Unknown ids have no dependencies.
    pub fn dependencies_of(&self, id: impl AsRef<Path>) -> BTreeSet<PathBuf> {
        let Some(&start) = self.nodes.get(id.as_ref()) else {
            return BTreeSet::new();
        };

        let mut deps = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                deps.insert(self.graph[node].clone());
            }
        }
        deps
    }

    /// Entry-points ordered so that every dependency comes before its
    /// dependents. Fails if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<PathBuf>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .rev()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => Err(TaskherdError::DagCycle(format!(
                "cycle detected in entry-point graph involving '{}'",
                self.graph[cycle.node_id()].display()
            ))),
        }
    }
}
