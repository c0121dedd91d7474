use taskherd::config::{ClusterSection, CompileSection, EntryPointConfig, PlanFile, RawPlanFile};
use taskherd::dag::{EntryPoint, EntryPointGraph, Task};
use taskherd::types::FailurePolicy;

/// Task for entry-point `ep` (whose path is also `ep`).
pub fn task(ep: &str, format: &str, process_dts: bool) -> Task {
    Task::new(EntryPoint::new(ep, ep), format, process_dts)
}

/// Entry-point graph from `(dependent, dependency)` pairs.
pub fn graph(edges: &[(&str, &str)]) -> EntryPointGraph {
    let mut graph = EntryPointGraph::new();
    for (dependent, dependency) in edges {
        graph.add_dependency(*dependent, *dependency);
    }
    graph
}

/// Builder for `PlanFile` to simplify test setup.
pub struct PlanBuilder {
    plan: RawPlanFile,
}

impl PlanBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            plan: RawPlanFile {
                cluster: ClusterSection::default(),
                compile: CompileSection {
                    cmd: cmd.to_string(),
                },
                entry_points: Vec::new(),
            },
        }
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.plan.cluster.max_workers = n;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.plan.cluster.on_failure = policy;
        self
    }

    pub fn with_entry_point(mut self, ep: EntryPointConfig) -> Self {
        self.plan.entry_points.push(ep);
        self
    }

    pub fn build_raw(self) -> RawPlanFile {
        self.plan
    }

    pub fn build(self) -> PlanFile {
        PlanFile::try_from(self.plan).expect("Failed to build valid plan from builder")
    }
}

/// Builder for `EntryPointConfig`.
pub struct EntryPointBuilder {
    ep: EntryPointConfig,
}

impl EntryPointBuilder {
    /// Entry-point `name` at path `name`, typings on, no formats yet.
    pub fn new(name: &str) -> Self {
        Self {
            ep: EntryPointConfig {
                name: name.to_string(),
                path: name.into(),
                formats: Vec::new(),
                typings: true,
                dependencies: Vec::new(),
            },
        }
    }

    pub fn format(mut self, format: &str) -> Self {
        self.ep.formats.push(format.to_string());
        self
    }

    pub fn no_typings(mut self) -> Self {
        self.ep.typings = false;
        self
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.ep.dependencies.push(name.to_string());
        self
    }

    pub fn build(self) -> EntryPointConfig {
        self.ep
    }
}
