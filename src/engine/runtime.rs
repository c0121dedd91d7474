// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, TaskherdError};
use crate::exec::{WorkerHandle, WorkerSpawner};

use super::core::{MasterCore, MasterStep};
use super::{MasterCommand, WorkerEvent, WorkerId};

/// Requests that a running executor abort (e.g. on Ctrl-C).
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // A full buffer means a shutdown is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Receiving side of a [`ShutdownHandle`].
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: mpsc::Receiver<()>,
}

impl ShutdownSignal {
    /// Non-blocking check for callers that cannot `select!` on the signal.
    pub fn is_requested(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

/// Drives [`MasterCore`] in response to worker events and delegates worker
/// lifecycle to a [`WorkerSpawner`].
///
/// This is a pure IO shell: every scheduling decision is made by the core.
/// The shell owns the worker handles, the event channel all workers report
/// on, and the shutdown channel.
pub struct ClusterMaster<S: WorkerSpawner> {
    core: MasterCore,
    spawner: S,
    workers: HashMap<WorkerId, Box<dyn WorkerHandle>>,
    event_tx: mpsc::Sender<WorkerEvent>,
    event_rx: mpsc::Receiver<WorkerEvent>,
    shutdown: ShutdownSignal,
}

impl<S: WorkerSpawner> fmt::Debug for ClusterMaster<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterMaster")
            .field("core", &self.core)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<S: WorkerSpawner> ClusterMaster<S> {
    pub fn new(core: MasterCore, spawner: S, shutdown: ShutdownSignal) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>(64);
        Self {
            core,
            spawner,
            workers: HashMap::new(),
            event_tx,
            event_rx,
            shutdown,
        }
    }

    /// Run until every task is terminal or a fatal condition occurs.
    ///
    /// All remaining workers are stopped before this returns, whatever the
    /// outcome.
    pub async fn run(mut self) -> Result<()> {
        info!(max_workers = self.core.max_workers(), "cluster master started");

        let result = self.drive().await;
        self.stop_workers();

        match &result {
            Ok(()) => info!("all tasks processed; cluster master exiting"),
            Err(err) => error!(error = %err, "cluster master aborted"),
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let step = self.core.start()?;
        if self.apply(step)? {
            return Ok(());
        }

        loop {
            let event = tokio::select! {
                event = self.event_rx.recv() => event,
                Some(()) = self.shutdown.rx.recv() => {
                    warn!("shutdown requested; aborting run");
                    return Err(TaskherdError::Interrupted);
                }
            };

            let Some(event) = event else {
                return Err(TaskherdError::ProtocolViolation(
                    "worker event channel closed".to_string(),
                ));
            };

            debug!(worker = %event.worker(), ?event, "master received event");

            if let WorkerEvent::Exited { worker, .. } = &event {
                self.workers.remove(worker);
            }

            let step = self.core.step(event)?;
            if self.apply(step)? {
                return Ok(());
            }
        }
    }

    /// Execute the step's commands; returns whether the run is finished.
    fn apply(&mut self, step: MasterStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command)?;
        }
        Ok(step.finished)
    }

    fn execute_command(&mut self, command: MasterCommand) -> Result<()> {
        match command {
            MasterCommand::Spawn(worker) => {
                debug!(worker = %worker, "spawning worker");
                let handle = self.spawner.spawn(worker, self.event_tx.clone())?;
                self.workers.insert(worker, handle);
            }
            MasterCommand::Send { worker, message } => {
                let handle = self.workers.get_mut(&worker).ok_or_else(|| {
                    TaskherdError::ProtocolViolation(format!("no handle for worker #{worker}"))
                })?;
                // A worker that died is reported through its exit event.
                if let Err(err) = handle.send(message) {
                    warn!(worker = %worker, error = %err, "failed to deliver message to worker");
                }
            }
        }
        Ok(())
    }

    fn stop_workers(&mut self) {
        self.event_rx.close();
        for (worker, mut handle) in self.workers.drain() {
            debug!(worker = %worker, "stopping worker");
            handle.kill();
        }
    }
}
