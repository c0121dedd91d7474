// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The master talks to a `WorkerSpawner` instead of forking processes
//! itself. This makes it easy to swap in a scripted fake in tests while
//! keeping the production backends in [`in_process`](super::in_process) and
//! [`process`](super::process).
//!
//! A spawned worker reports on the shared event channel, in order:
//! `Online` once, any number of `Message`/`Invalid` events, and `Exited` if
//! it stops on its own. A worker stopped through [`WorkerHandle::kill`]
//! reports nothing further.

use tokio::sync::mpsc;

use crate::engine::{MessageToWorker, WorkerEvent, WorkerId};
use crate::errors::Result;

/// Master-side handle to one running worker.
pub trait WorkerHandle: Send {
    /// Queue a message for the worker. Fails if the worker is gone.
    fn send(&mut self, message: MessageToWorker) -> Result<()>;

    /// Stop the worker without waiting for it.
    fn kill(&mut self);
}

/// Trait abstracting how workers are started.
pub trait WorkerSpawner: Send {
    fn spawn(
        &mut self,
        worker: WorkerId,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>>;
}
