// src/dag/task.rs

//! Task descriptors handed to the scheduler by the caller.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File that holds per-entry-point persisted state (processed markers).
pub const MANIFEST_FILE: &str = "package.json";

/// Property recorded as processed when a task also produced type declarations.
pub const TYPINGS_PROPERTY: &str = "typings";

/// Index of a task in the list the queue was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of deployable code. Two entry-points are the same iff their paths
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub path: PathBuf,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Identity key used by the dependency graph.
    pub fn id(&self) -> &Path {
        &self.path
    }

    /// Where processed markers for this entry-point are persisted.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }
}

/// One (entry-point, format) compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub entry_point: EntryPoint,
    /// Format property this task compiles (e.g. `fesm2015`, `main`).
    pub format_property: String,
    /// Properties to record as processed once the task succeeds. Usually
    /// contains `format_property` plus any aliases pointing at the same file.
    pub format_properties_to_mark_as_processed: Vec<String>,
    /// Whether this task is the unique producer of type declarations for its
    /// entry-point.
    pub process_dts: bool,
}

impl Task {
    pub fn new(entry_point: EntryPoint, format_property: impl Into<String>, process_dts: bool) -> Self {
        let format_property = format_property.into();
        Self {
            entry_point,
            format_properties_to_mark_as_processed: vec![format_property.clone()],
            format_property,
            process_dts,
        }
    }

    /// (entry-point, format) pair; unique within a task list.
    pub fn target(&self) -> (&Path, &str) {
        (self.entry_point.id(), self.format_property.as_str())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{entryPoint: {}, formatProperty: {}, processDts: {}}}",
            self.entry_point.name, self.format_property, self.process_dts
        )
    }
}

/// Module format a format property is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointFormat {
    Esm5,
    Esm2015,
    Umd,
    CommonJs,
}

impl EntryPointFormat {
    /// Best-effort guess from the property name alone; the real format can
    /// only be known by inspecting the file the property points at.
    pub fn estimate(format_property: &str) -> Option<Self> {
        match format_property {
            "fesm2015" | "es2015" | "esm2015" => Some(EntryPointFormat::Esm2015),
            "fesm5" | "esm5" | "module" => Some(EntryPointFormat::Esm5),
            "main" | "browser" => Some(EntryPointFormat::Umd),
            "commonjs" | "cjs" => Some(EntryPointFormat::CommonJs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPointFormat::Esm5 => "esm5",
            EntryPointFormat::Esm2015 => "esm2015",
            EntryPointFormat::Umd => "umd",
            EntryPointFormat::CommonJs => "commonjs",
        }
    }
}

impl fmt::Display for EntryPointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
