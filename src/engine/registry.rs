// src/engine/registry.rs

//! Worker registry owned by the master core.

use std::collections::{BTreeMap, BTreeSet};

use crate::dag::TaskId;
use crate::engine::WorkerId;
use crate::errors::{Result, TaskherdError};

/// State of a worker that has come online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy(TaskId),
    /// Exited; kept only until the run aborts.
    Dead,
}

/// Tracks spawned-but-not-yet-online workers and the state of online ones.
///
/// Iteration order is by worker id, i.e. spawn order.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerState>,
    starting: BTreeSet<WorkerId>,
    next_id: u64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a worker about to be spawned.
    pub fn allocate(&mut self) -> WorkerId {
        self.next_id += 1;
        let id = WorkerId(self.next_id);
        self.starting.insert(id);
        id
    }

    /// Move a spawned worker to `Idle`.
    pub fn come_online(&mut self, id: WorkerId) -> Result<()> {
        if self.workers.contains_key(&id) {
            return Err(TaskherdError::ProtocolViolation(format!(
                "worker #{id} came online more than once"
            )));
        }
        if !self.starting.remove(&id) {
            return Err(TaskherdError::ProtocolViolation(format!(
                "unknown worker #{id} came online"
            )));
        }
        self.workers.insert(id, WorkerState::Idle);
        Ok(())
    }

    pub fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.workers.get(&id).copied()
    }

    pub fn assign(&mut self, id: WorkerId, task: TaskId) {
        self.workers.insert(id, WorkerState::Busy(task));
    }

    pub fn release(&mut self, id: WorkerId) {
        self.workers.insert(id, WorkerState::Idle);
    }

    /// Drop a worker that exited before coming online. Returns whether it
    /// was starting.
    pub fn forget_starting(&mut self, id: WorkerId) -> bool {
        self.starting.remove(&id)
    }

    /// Mark an online worker dead, returning its previous state.
    pub fn mark_dead(&mut self, id: WorkerId) -> Option<WorkerState> {
        let slot = self.workers.get_mut(&id)?;
        Some(std::mem::replace(slot, WorkerState::Dead))
    }

    pub fn remove(&mut self, id: WorkerId) {
        self.workers.remove(&id);
    }

    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.with_state(|s| s == WorkerState::Idle)
    }

    pub fn busy_workers(&self) -> Vec<WorkerId> {
        self.with_state(|s| matches!(s, WorkerState::Busy(_)))
    }

    pub fn online_workers(&self) -> Vec<WorkerId> {
        self.with_state(|s| s != WorkerState::Dead)
    }

    /// Workers counted against the ceiling: online and alive, or starting.
    pub fn live_count(&self) -> usize {
        self.online_workers().len() + self.starting.len()
    }

    fn with_state(&self, pred: impl Fn(WorkerState) -> bool) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, s)| pred(**s))
            .map(|(id, _)| *id)
            .collect()
    }
}
