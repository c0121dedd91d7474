// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{PlanFile, RawPlanFile};
use crate::errors::{Result, TaskherdError};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = TaskherdError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        validate_plan(&raw)?;
        Ok(PlanFile::new_unchecked(raw.cluster, raw.compile, raw.entry_points))
    }
}

/// Check every invariant `PlanFile` relies on.
pub fn validate_plan(plan: &RawPlanFile) -> Result<()> {
    ensure_has_entry_points(plan)?;
    validate_cluster(plan)?;
    validate_compile(plan)?;
    validate_entry_points(plan)?;
    validate_dependencies(plan)?;
    validate_dag(plan)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> TaskherdError {
    TaskherdError::ConfigError(msg.into())
}

fn ensure_has_entry_points(plan: &RawPlanFile) -> Result<()> {
    if plan.entry_points.is_empty() {
        return Err(config_error(
            "plan must contain at least one [[entry_point]] table",
        ));
    }
    Ok(())
}

fn validate_cluster(plan: &RawPlanFile) -> Result<()> {
    if plan.cluster.max_workers == 0 {
        return Err(config_error("[cluster].max_workers must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_compile(plan: &RawPlanFile) -> Result<()> {
    if plan.compile.cmd.trim().is_empty() {
        return Err(config_error("[compile].cmd must not be empty"));
    }
    Ok(())
}

fn validate_entry_points(plan: &RawPlanFile) -> Result<()> {
    let mut names = HashSet::new();
    let mut paths = HashSet::new();

    for ep in &plan.entry_points {
        if ep.name.trim().is_empty() {
            return Err(config_error("entry-point names must not be empty"));
        }
        if !names.insert(ep.name.as_str()) {
            return Err(config_error(format!(
                "entry-point '{}' is declared more than once",
                ep.name
            )));
        }
        if !paths.insert(ep.path.as_path()) {
            return Err(config_error(format!(
                "entry-point '{}' reuses path {:?}",
                ep.name, ep.path
            )));
        }

        if ep.formats.is_empty() {
            return Err(config_error(format!(
                "entry-point '{}' must list at least one format",
                ep.name
            )));
        }
        let mut formats = HashSet::new();
        for format in &ep.formats {
            if !formats.insert(format.as_str()) {
                return Err(config_error(format!(
                    "entry-point '{}' lists format '{}' more than once",
                    ep.name, format
                )));
            }
        }
    }
    Ok(())
}

fn validate_dependencies(plan: &RawPlanFile) -> Result<()> {
    let names: HashSet<&str> = plan.entry_points.iter().map(|ep| ep.name.as_str()).collect();

    for ep in &plan.entry_points {
        for dep in &ep.dependencies {
            if dep == &ep.name {
                return Err(config_error(format!(
                    "entry-point '{}' cannot depend on itself",
                    ep.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(config_error(format!(
                    "entry-point '{}' has unknown dependency '{}'",
                    ep.name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(plan: &RawPlanFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for ep in &plan.entry_points {
        graph.add_node(ep.name.as_str());
    }
    for ep in &plan.entry_points {
        for dep in &ep.dependencies {
            graph.add_edge(dep.as_str(), ep.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TaskherdError::DagCycle(format!(
            "cycle detected in entry-point dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}
