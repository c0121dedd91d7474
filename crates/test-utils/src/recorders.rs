use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use taskherd::errors::Result;
use taskherd::exec::RunLock;
use taskherd::persist::{StateChange, StateWriter};

/// `StateWriter` that only records what it was asked to write.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    writes: Arc<Mutex<Vec<(PathBuf, Vec<StateChange>)>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(PathBuf, Vec<StateChange>)> {
        self.writes.lock().unwrap().clone()
    }

    /// Targets written to, in order.
    pub fn targets(&self) -> Vec<PathBuf> {
        self.writes().into_iter().map(|(target, _)| target).collect()
    }
}

impl StateWriter for RecordingWriter {
    fn write_changes(&self, changes: &[StateChange], target: &Path) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((target.to_path_buf(), changes.to_vec()));
        Ok(())
    }
}

/// `RunLock` that records `acquire`/`release` calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingLock {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl RunLock for RecordingLock {
    fn acquire(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("acquire");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("release");
        Ok(())
    }
}
