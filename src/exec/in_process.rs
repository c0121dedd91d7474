// src/exec/in_process.rs

//! Workers hosted as Tokio tasks inside the master process.

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::engine::{MessageToWorker, WorkerEvent, WorkerId};
use crate::errors::Result;
use crate::exec::backend::{WorkerHandle, WorkerSpawner};
use crate::exec::worker::{ClusterWorker, CreateCompileFn};

/// Exit code reported for a worker whose compile function panicked. Matches
/// the status of a process worker that dies from the same panic.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Spawns each worker as a [`ClusterWorker`] task plus a forwarding task
/// that relays its messages, in order, to the master.
#[derive(Clone)]
pub struct InProcessSpawner {
    create_compile_fn: CreateCompileFn,
}

impl InProcessSpawner {
    pub fn new(create_compile_fn: CreateCompileFn) -> Self {
        Self { create_compile_fn }
    }
}

impl std::fmt::Debug for InProcessSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessSpawner").finish_non_exhaustive()
    }
}

impl WorkerSpawner for InProcessSpawner {
    fn spawn(
        &mut self,
        worker: WorkerId,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();

        let cluster_worker = ClusterWorker::new(worker, &self.create_compile_fn, outbox_tx);
        let worker_task = tokio::spawn(cluster_worker.run(inbox_rx));
        let worker_abort = worker_task.abort_handle();

        let forwarder = tokio::spawn(async move {
            if events.send(WorkerEvent::Online { worker }).await.is_err() {
                return;
            }

            // Ends once the worker and its compile function drop their senders.
            while let Some(message) = outbox_rx.recv().await {
                if events
                    .send(WorkerEvent::Message { worker, message })
                    .await
                    .is_err()
                {
                    return;
                }
            }

            let code = match worker_task.await {
                Ok(Ok(())) => Some(0),
                Ok(Err(err)) => {
                    let detail = format!("{err:#}");
                    warn!(worker = %worker, error = %detail, "worker crashed");
                    Some(1)
                }
                Err(join) if join.is_panic() => {
                    warn!(worker = %worker, "worker panicked");
                    Some(PANIC_EXIT_CODE)
                }
                Err(_) => None,
            };
            debug!(worker = %worker, ?code, "worker task finished");
            let _ = events.send(WorkerEvent::Exited { worker, code }).await;
        });

        Ok(Box::new(InProcessHandle {
            inbox: inbox_tx,
            worker: worker_abort,
            forwarder,
        }))
    }
}

struct InProcessHandle {
    inbox: mpsc::UnboundedSender<MessageToWorker>,
    worker: AbortHandle,
    forwarder: JoinHandle<()>,
}

impl WorkerHandle for InProcessHandle {
    fn send(&mut self, message: MessageToWorker) -> Result<()> {
        self.inbox
            .send(message)
            .map_err(|_| anyhow!("worker inbox is closed"))?;
        Ok(())
    }

    fn kill(&mut self) {
        self.forwarder.abort();
        self.worker.abort();
    }
}
