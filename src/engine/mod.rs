// src/engine/mod.rs

//! Cluster master for taskherd.
//!
//! This module ties together:
//! - the task queue (what may run next)
//! - the worker registry (who is idle, busy or dead)
//! - the completion router (what happens when a task finishes)
//! - the async event loop that reacts to:
//!   - workers coming online
//!   - messages from workers
//!   - worker exits
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::fmt;

/// Stable identifier of a worker for the lifetime of one run.
///
/// Ids are never reused: a replacement worker gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events flowing into the master from worker backends.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A spawned worker is ready to accept a task.
    Online { worker: WorkerId },
    /// A worker sent a well-formed message.
    Message {
        worker: WorkerId,
        message: MessageFromWorker,
    },
    /// A worker sent something that could not be decoded.
    Invalid { worker: WorkerId, detail: String },
    /// A worker stopped without being asked to.
    Exited {
        worker: WorkerId,
        code: Option<i32>,
    },
}

impl WorkerEvent {
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Online { worker }
            | WorkerEvent::Message { worker, .. }
            | WorkerEvent::Invalid { worker, .. }
            | WorkerEvent::Exited { worker, .. } => *worker,
        }
    }
}

pub mod completion;
pub mod core;
pub mod protocol;
pub mod registry;
pub mod runtime;

pub use completion::{
    CompletionRouter, LogAndContinue, MarkAsProcessed, TaskCompletedHandler, TaskOutcome,
    ThrowOnFailure,
};
pub use core::{check_state_target, MasterCommand, MasterCore, MasterStep};
pub use protocol::{MessageFromWorker, MessageToWorker};
pub use registry::{WorkerRegistry, WorkerState};
pub use runtime::{shutdown_channel, ClusterMaster, ShutdownHandle, ShutdownSignal};
