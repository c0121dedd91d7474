// src/exec/worker.rs

//! Worker-side task execution.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::dag::Task;
use crate::engine::{MessageFromWorker, MessageToWorker, TaskOutcome, WorkerId};
use crate::persist::StateChange;

/// Synchronous compile function run for each assigned task.
///
/// It must report the task's outcome through the [`TaskReporter`] it was
/// built with before returning `Ok(())`. Returning `Err` means the compile
/// machinery itself broke, which is fatal for the run.
pub type CompileFn = Box<dyn FnMut(&Task) -> anyhow::Result<()> + Send>;

/// Builds a worker's compile function around its completion reporter.
pub type CreateCompileFn = Arc<dyn Fn(TaskReporter) -> CompileFn + Send + Sync>;

/// Completion callback handed to the compile function.
#[derive(Debug, Clone)]
pub struct TaskReporter {
    outbox: mpsc::UnboundedSender<MessageFromWorker>,
    reported: Arc<AtomicBool>,
}

impl TaskReporter {
    pub fn new(outbox: mpsc::UnboundedSender<MessageFromWorker>) -> Self {
        Self {
            outbox,
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report the terminal outcome of `task`.
    pub fn task_completed(&self, task: &Task, outcome: TaskOutcome, message: Option<String>) {
        debug!(task = %task, ?outcome, "reporting task completion");
        self.reported.store(true, Ordering::SeqCst);
        self.post(MessageFromWorker::TaskCompleted { outcome, message });
    }

    /// Ask the master to persist `changes` into `target_path`.
    pub fn update_persistent_state(&self, changes: Vec<StateChange>, target_path: PathBuf) {
        self.post(MessageFromWorker::UpdatePersistentState {
            changes,
            target_path,
        });
    }

    pub(crate) fn error(&self, detail: String) {
        self.post(MessageFromWorker::Error { detail });
    }

    /// Whether a completion was reported since the last call.
    pub(crate) fn take_reported(&self) -> bool {
        self.reported.swap(false, Ordering::SeqCst)
    }

    fn post(&self, message: MessageFromWorker) {
        if self.outbox.send(message).is_err() {
            debug!("worker outbox closed; dropping message");
        }
    }
}

/// Runs assigned tasks one at a time.
///
/// A worker never asks for work and never exits while its inbox is open.
pub struct ClusterWorker {
    id: WorkerId,
    compile: Arc<Mutex<CompileFn>>,
    reporter: TaskReporter,
}

impl ClusterWorker {
    pub fn new(
        id: WorkerId,
        create_compile_fn: &CreateCompileFn,
        outbox: mpsc::UnboundedSender<MessageFromWorker>,
    ) -> Self {
        let reporter = TaskReporter::new(outbox);
        let compile = create_compile_fn(reporter.clone());
        Self {
            id,
            compile: Arc::new(Mutex::new(compile)),
            reporter,
        }
    }

    /// Process messages until the inbox closes.
    ///
    /// A panic in the compile function resumes on the task running this
    /// future, so the host sees a panicked worker. `Err` means the blocking
    /// compile thread was cancelled.
    pub async fn run(self, mut inbox: mpsc::UnboundedReceiver<MessageToWorker>) -> anyhow::Result<()> {
        debug!(worker = %self.id, "worker started");

        while let Some(message) = inbox.recv().await {
            match message {
                MessageToWorker::ProcessTask { task } => self.process(task).await?,
            }
        }

        debug!(worker = %self.id, "worker inbox closed; exiting");
        Ok(())
    }

    async fn process(&self, task: Task) -> anyhow::Result<()> {
        let label = task.to_string();
        debug!(worker = %self.id, task = %label, "processing task");

        let compile = Arc::clone(&self.compile);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = compile
                .lock()
                .map_err(|_| anyhow!("compile function is poisoned"))?;
            let compile: &mut CompileFn = &mut guard;
            compile(&task)
        })
        .await;

        let result = match joined {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                error!(worker = %self.id, task = %label, "compile function panicked");
                std::panic::resume_unwind(join.into_panic())
            }
            Err(join) => {
                return Err(anyhow!("compile function was cancelled while processing {label}: {join}"));
            }
        };

        let reported = self.reporter.take_reported();
        match result {
            Ok(()) if reported => {}
            Ok(()) => self.reporter.error(format!(
                "compile function returned without reporting completion of {label}"
            )),
            Err(err) => {
                error!(worker = %self.id, task = %label, error = %err, "compile function failed");
                self.reporter.error(format!("{err:#}"));
            }
        }
        Ok(())
    }
}
