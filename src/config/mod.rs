// src/config/mod.rs

//! Plan file loading and validation for taskherd.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a plan file from disk (`loader.rs`).
//! - Validate invariants like acyclic entry-point dependencies (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    max_workers_from_env, ClusterSection, CompileSection, EntryPointConfig, PlanFile, RawPlanFile,
    MAX_WORKERS_ENV,
};
pub use validate::validate_plan;
