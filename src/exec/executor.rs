// src/exec/executor.rs

//! Top-level executors: build the queue and run every task, either across a
//! worker pool or serially in the calling thread.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{EntryPointGraph, Task, TaskQueue};
use crate::engine::core::check_state_target;
use crate::engine::{
    shutdown_channel, ClusterMaster, CompletionRouter, MasterCore, MessageFromWorker,
    ShutdownHandle, ShutdownSignal, WorkerId,
};
use crate::errors::{Result, TaskherdError};
use crate::exec::backend::WorkerSpawner;
use crate::exec::worker::{CreateCompileFn, TaskReporter};
use crate::persist::StateWriter;

/// Id used in errors raised by the serial executor.
const LOCAL_WORKER: WorkerId = WorkerId(0);

/// Advisory lock serializing whole runs against each other.
pub trait RunLock: Send {
    fn acquire(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Lock that never blocks, for callers that serialize runs themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

impl RunLock for NoopLock {
    fn acquire(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Release `lock` after `result` is known, keeping the run's own error when
/// both fail.
fn release_after<L: RunLock>(lock: &mut L, result: Result<()>) -> Result<()> {
    let released = lock.release();
    if let (Err(_), Err(err)) = (&result, &released) {
        warn!(error = %err, "failed to release run lock after a failed run");
    }
    result.and(released)
}

/// Runs tasks on a pool of up to `max_workers` workers.
pub struct ClusterExecutor<S: WorkerSpawner, L: RunLock> {
    max_workers: usize,
    spawner: S,
    lock: L,
    writer: Arc<dyn StateWriter>,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
}

impl<S: WorkerSpawner, L: RunLock> fmt::Debug for ClusterExecutor<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterExecutor")
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl<S: WorkerSpawner, L: RunLock> ClusterExecutor<S, L> {
    pub fn new(max_workers: usize, spawner: S, lock: L, writer: Arc<dyn StateWriter>) -> Self {
        let (shutdown, signal) = shutdown_channel();
        Self {
            max_workers,
            spawner,
            lock,
            writer,
            shutdown,
            signal,
        }
    }

    /// Handle that aborts [`ClusterExecutor::execute`] while it runs.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Process `tasks` (topologically ordered) under the run lock.
    ///
    /// The lock is released once every worker has stopped, on success and
    /// failure alike.
    pub async fn execute<F>(self, tasks: Vec<Task>, graph: &EntryPointGraph, create_router: F) -> Result<()>
    where
        F: FnOnce(&[Task]) -> CompletionRouter,
    {
        let Self {
            max_workers,
            spawner,
            mut lock,
            writer,
            signal,
            ..
        } = self;

        lock.acquire()?;
        info!(tasks = tasks.len(), max_workers, "processing tasks with a worker pool");

        let result = async {
            let router = create_router(&tasks);
            let queue = TaskQueue::new(tasks, graph)?;
            let core = MasterCore::new(queue, router, writer, max_workers)?;
            ClusterMaster::new(core, spawner, signal).run().await
        }
        .await;

        release_after(&mut lock, result)
    }
}

/// Runs every task in the calling thread, one after the other.
///
/// A shutdown request is honoured between tasks; the task being compiled
/// when it arrives runs to completion first.
pub struct SingleProcessExecutor<L: RunLock> {
    lock: L,
    writer: Arc<dyn StateWriter>,
    create_compile_fn: CreateCompileFn,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
}

impl<L: RunLock> fmt::Debug for SingleProcessExecutor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleProcessExecutor").finish_non_exhaustive()
    }
}

impl<L: RunLock> SingleProcessExecutor<L> {
    pub fn new(lock: L, writer: Arc<dyn StateWriter>, create_compile_fn: CreateCompileFn) -> Self {
        let (shutdown, signal) = shutdown_channel();
        Self {
            lock,
            writer,
            create_compile_fn,
            shutdown,
            signal,
        }
    }

    /// Handle that aborts [`SingleProcessExecutor::execute`] before its next
    /// task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Same contract as [`ClusterExecutor::execute`], without workers.
    pub fn execute<F>(mut self, tasks: Vec<Task>, graph: &EntryPointGraph, create_router: F) -> Result<()>
    where
        F: FnOnce(&[Task]) -> CompletionRouter,
    {
        self.lock.acquire()?;
        info!(tasks = tasks.len(), "processing tasks serially");

        let result = self.run_serially(tasks, graph, create_router);
        release_after(&mut self.lock, result)
    }

    fn run_serially<F>(&mut self, tasks: Vec<Task>, graph: &EntryPointGraph, create_router: F) -> Result<()>
    where
        F: FnOnce(&[Task]) -> CompletionRouter,
    {
        let router = create_router(&tasks);
        let mut queue = TaskQueue::new(tasks, graph)?;

        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
        let reporter = TaskReporter::new(outbox_tx);
        let mut compile = (self.create_compile_fn)(reporter.clone());

        while !queue.all_tasks_completed() {
            if self.signal.is_requested() {
                warn!("shutdown requested; aborting run");
                return Err(TaskherdError::Interrupted);
            }
            let Some(id) = queue.get_next_task() else {
                return Err(TaskherdError::Deadlock(queue.to_string()));
            };
            let task = queue.task(id).clone();
            debug!(task = %task, "processing task");

            compile(&task).map_err(|err| TaskherdError::WorkerError {
                worker: LOCAL_WORKER,
                detail: format!("{err:#}"),
            })?;
            reporter.take_reported();

            let mut completion = None;
            while let Ok(message) = outbox_rx.try_recv() {
                match message {
                    MessageFromWorker::UpdatePersistentState {
                        changes,
                        target_path,
                    } => {
                        check_state_target(LOCAL_WORKER, &task, &target_path)?;
                        self.writer.write_changes(&changes, &target_path)?;
                    }
                    MessageFromWorker::TaskCompleted { outcome, message } => {
                        if completion.replace((outcome, message)).is_some() {
                            return Err(TaskherdError::ProtocolViolation(format!(
                                "task {task} reported completion more than once"
                            )));
                        }
                    }
                    MessageFromWorker::Error { detail } => {
                        return Err(TaskherdError::WorkerError {
                            worker: LOCAL_WORKER,
                            detail,
                        });
                    }
                }
            }

            let Some((outcome, message)) = completion else {
                return Err(TaskherdError::WorkerError {
                    worker: LOCAL_WORKER,
                    detail: format!("compile function returned without reporting completion of {task}"),
                });
            };

            router.dispatch(&mut queue, id, outcome, message.as_deref())?;
            if !queue.status(id).is_terminal() {
                queue.mark_task_completed(id)?;
            }
        }

        info!("all tasks completed");
        Ok(())
    }
}
