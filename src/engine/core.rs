// src/engine/core.rs

//! Pure master state machine.
//!
//! [`MasterCore`] consumes [`WorkerEvent`]s and produces:
//! - an updated queue and worker registry
//! - a list of [`MasterCommand`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::ClusterMaster`) is responsible for:
//! - spawning and killing workers
//! - delivering messages to workers
//! - reading worker events and shutdown requests
//!
//! The core has no channels, no Tokio types and no processes, so every
//! scheduling decision is unit tested here.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::{Task, TaskId, TaskQueue};
use crate::engine::completion::{CompletionRouter, TaskOutcome};
use crate::engine::protocol::{MessageFromWorker, MessageToWorker};
use crate::engine::registry::{WorkerRegistry, WorkerState};
use crate::engine::{WorkerEvent, WorkerId};
use crate::errors::{Result, TaskherdError};
use crate::persist::{StateChange, StateWriter};

/// Command produced by the core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterCommand {
    /// Start a new worker under this id.
    Spawn(WorkerId),
    /// Deliver a message to a worker.
    Send {
        worker: WorkerId,
        message: MessageToWorker,
    },
}

/// Decision returned by the core after handling one event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterStep {
    pub commands: Vec<MasterCommand>,
    /// Every task is terminal; the shell should stop all workers and return.
    pub finished: bool,
}

impl MasterStep {
    fn running(commands: Vec<MasterCommand>) -> Self {
        Self {
            commands,
            finished: false,
        }
    }

    fn finished() -> Self {
        Self {
            commands: Vec::new(),
            finished: true,
        }
    }
}

/// Master state: the queue, the worker registry and the completion routing.
#[derive(Debug)]
pub struct MasterCore {
    queue: TaskQueue,
    registry: WorkerRegistry,
    router: CompletionRouter,
    writer: Arc<dyn StateWriter>,
    max_workers: usize,
}

impl MasterCore {
    pub fn new(
        queue: TaskQueue,
        router: CompletionRouter,
        writer: Arc<dyn StateWriter>,
        max_workers: usize,
    ) -> Result<Self> {
        if max_workers == 0 {
            return Err(TaskherdError::ConfigError(
                "worker count must be >= 1 (got 0)".to_string(),
            ));
        }

        Ok(Self {
            queue,
            registry: WorkerRegistry::new(),
            router,
            writer,
            max_workers,
        })
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// First step of a run: nothing is online yet, so this either finishes
    /// immediately (no tasks) or asks for the first worker.
    pub fn start(&mut self) -> Result<MasterStep> {
        info!(
            tasks = self.queue.tasks().len(),
            max_workers = self.max_workers,
            "starting cluster master"
        );
        self.maybe_distribute_work()
    }

    /// Handle a single worker event.
    pub fn step(&mut self, event: WorkerEvent) -> Result<MasterStep> {
        match event {
            WorkerEvent::Online { worker } => {
                self.registry.come_online(worker)?;
                debug!(worker = %worker, "worker online");
                self.maybe_distribute_work()
            }
            WorkerEvent::Message { worker, message } => self.on_message(worker, message),
            WorkerEvent::Invalid { worker, detail } => Err(TaskherdError::ProtocolViolation(
                format!("invalid message from worker #{worker}: {detail}"),
            )),
            WorkerEvent::Exited { worker, code } => self.on_exit(worker, code),
        }
    }

    fn on_message(&mut self, worker: WorkerId, message: MessageFromWorker) -> Result<MasterStep> {
        let Some(state) = self.registry.state(worker) else {
            return Err(TaskherdError::ProtocolViolation(format!(
                "received message from unknown worker #{worker}"
            )));
        };

        match message {
            MessageFromWorker::Error { detail } => {
                Err(TaskherdError::WorkerError { worker, detail })
            }
            MessageFromWorker::TaskCompleted { outcome, message } => {
                let task = assigned_task(worker, state, "task_completed")?;
                self.on_task_completed(worker, task, outcome, message.as_deref())
            }
            MessageFromWorker::UpdatePersistentState {
                changes,
                target_path,
            } => {
                let task = assigned_task(worker, state, "update_persistent_state")?;
                self.on_update_state(worker, task, &changes, &target_path)?;
                Ok(MasterStep::default())
            }
        }
    }

    fn on_task_completed(
        &mut self,
        worker: WorkerId,
        task: TaskId,
        outcome: TaskOutcome,
        message: Option<&str>,
    ) -> Result<MasterStep> {
        debug!(
            worker = %worker,
            task = %self.queue.task(task),
            ?outcome,
            "task completed"
        );

        self.router
            .dispatch(&mut self.queue, task, outcome, message)?;

        // A failure handler may already have settled the task.
        if !self.queue.status(task).is_terminal() {
            self.queue.mark_task_completed(task)?;
        }

        self.registry.release(worker);
        self.maybe_distribute_work()
    }

    fn on_update_state(
        &self,
        worker: WorkerId,
        task: TaskId,
        changes: &[StateChange],
        target: &Path,
    ) -> Result<()> {
        check_state_target(worker, self.queue.task(task), target)?;
        self.writer.write_changes(changes, target)
    }

    fn on_exit(&mut self, worker: WorkerId, code: Option<i32>) -> Result<MasterStep> {
        if self.registry.forget_starting(worker) {
            warn!(worker = %worker, ?code, "worker exited before coming online; spawning a replacement");
            return Ok(MasterStep::running(vec![MasterCommand::Spawn(
                self.registry.allocate(),
            )]));
        }

        match self.registry.mark_dead(worker) {
            Some(WorkerState::Idle) => {
                self.registry.remove(worker);
                warn!(worker = %worker, ?code, "idle worker exited unexpectedly; spawning a replacement");
                Ok(MasterStep::running(vec![MasterCommand::Spawn(
                    self.registry.allocate(),
                )]))
            }
            Some(WorkerState::Busy(task)) => Err(TaskherdError::WorkerCrashed {
                worker,
                task: self.queue.task(task).to_string(),
            }),
            Some(WorkerState::Dead) | None => Err(TaskherdError::ProtocolViolation(format!(
                "exit reported for unknown worker #{worker}"
            ))),
        }
    }

    /// Hand assignable tasks to idle workers, growing the pool or detecting a
    /// deadlock as needed.
    fn maybe_distribute_work(&mut self) -> Result<MasterStep> {
        if self.queue.all_tasks_completed() {
            info!("all tasks completed");
            return Ok(MasterStep::finished());
        }

        let mut commands = Vec::new();
        let mut worker_available = false;

        for worker in self.registry.idle_workers() {
            worker_available = true;
            let Some(task) = self.queue.get_next_task() else {
                break;
            };

            self.registry.assign(worker, task);
            let task = self.queue.task(task);
            debug!(worker = %worker, task = %task, "assigning task");
            commands.push(MasterCommand::Send {
                worker,
                message: MessageToWorker::ProcessTask { task: task.clone() },
            });
            worker_available = false;
        }

        if !worker_available {
            let live = self.registry.live_count();
            if live < self.max_workers && self.queue.queued_count() > 0 {
                debug!(live, "spawning another worker as there is more work to be done");
                commands.push(MasterCommand::Spawn(self.registry.allocate()));
            } else {
                debug!("All {live} workers are currently busy and cannot take on more work");
            }
        } else if self.registry.busy_workers().is_empty() {
            return Err(TaskherdError::Deadlock(self.queue.to_string()));
        }

        Ok(MasterStep::running(commands))
    }
}

fn assigned_task(worker: WorkerId, state: WorkerState, kind: &str) -> Result<TaskId> {
    match state {
        WorkerState::Busy(task) => Ok(task),
        WorkerState::Idle | WorkerState::Dead => Err(TaskherdError::ProtocolViolation(format!(
            "received '{kind}' message from worker #{worker} while no task was assigned"
        ))),
    }
}

/// A worker may only persist state for the entry-point of the task it was
/// assigned.
pub fn check_state_target(worker: WorkerId, task: &Task, target: &Path) -> Result<()> {
    let expected = task.entry_point.manifest_path();
    if expected.as_path() != target {
        return Err(TaskherdError::UnexpectedStateTarget {
            worker,
            received: target.display().to_string(),
            expected: expected.display().to_string(),
        });
    }
    Ok(())
}
