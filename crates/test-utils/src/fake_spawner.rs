//! Scripted worker backend for cluster tests.
//!
//! Each fake worker comes online, then answers every `ProcessTask` with the
//! replies its script returns for that task. Nothing is compiled.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use taskherd::dag::Task;
use taskherd::engine::{MessageFromWorker, MessageToWorker, TaskOutcome, WorkerEvent, WorkerId};
use taskherd::errors::{Result, TaskherdError};
use taskherd::exec::{WorkerHandle, WorkerSpawner};
use taskherd::persist::processed_changes;

/// One scripted reaction of a fake worker.
#[derive(Debug, Clone)]
pub enum Reply {
    Send(MessageFromWorker),
    /// Emit a raw event, e.g. an undecodable line.
    Invalid(String),
    Sleep(Duration),
    /// Exit without answering further.
    Crash,
}

type Script = Arc<dyn Fn(WorkerId, &Task) -> Vec<Reply> + Send + Sync>;

/// What the fake backend observed during a run.
#[derive(Debug, Default)]
struct SpawnLog {
    spawned: Vec<WorkerId>,
    killed: Vec<WorkerId>,
    /// `(worker, task)` in assignment order.
    assignments: Vec<(WorkerId, String)>,
    in_flight: usize,
    max_in_flight: usize,
}

/// `WorkerSpawner` whose workers follow a script.
#[derive(Clone)]
pub struct FakeSpawner {
    script: Script,
    exit_after_online: Arc<HashSet<WorkerId>>,
    log: Arc<Mutex<SpawnLog>>,
}

impl FakeSpawner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(WorkerId, &Task) -> Vec<Reply> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            exit_after_online: Arc::new(HashSet::new()),
            log: Arc::new(Mutex::new(SpawnLog::default())),
        }
    }

    /// Workers that complete every task with `AllFormatsCompiled`.
    pub fn succeeding() -> Self {
        Self::new(|_, task| complete(task, TaskOutcome::AllFormatsCompiled))
    }

    /// Make `worker` exit right after coming online, before it is given work.
    pub fn exit_after_online(mut self, worker: WorkerId) -> Self {
        let mut set: HashSet<WorkerId> = (*self.exit_after_online).clone();
        set.insert(worker);
        self.exit_after_online = Arc::new(set);
        self
    }

    pub fn spawned(&self) -> Vec<WorkerId> {
        self.log.lock().unwrap().spawned.clone()
    }

    pub fn killed(&self) -> BTreeSet<WorkerId> {
        self.log.lock().unwrap().killed.iter().copied().collect()
    }

    pub fn assignments(&self) -> Vec<(WorkerId, String)> {
        self.log.lock().unwrap().assignments.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.log.lock().unwrap().max_in_flight
    }
}

impl std::fmt::Debug for FakeSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSpawner").finish_non_exhaustive()
    }
}

/// Replies of a well-behaved worker: persist the task's markers, then report.
pub fn complete(task: &Task, outcome: TaskOutcome) -> Vec<Reply> {
    vec![
        Reply::Send(MessageFromWorker::UpdatePersistentState {
            changes: processed_changes(&task.format_properties_to_mark_as_processed),
            target_path: task.entry_point.manifest_path(),
        }),
        Reply::Send(MessageFromWorker::TaskCompleted {
            outcome,
            message: None,
        }),
    ]
}

/// Replies of a worker whose compilation failed.
pub fn fail(message: &str) -> Vec<Reply> {
    vec![Reply::Send(MessageFromWorker::TaskCompleted {
        outcome: TaskOutcome::Failed,
        message: Some(message.to_string()),
    })]
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(
        &mut self,
        worker: WorkerId,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>> {
        self.log.lock().unwrap().spawned.push(worker);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let script = Arc::clone(&self.script);
        let log = Arc::clone(&self.log);
        let exit_early = self.exit_after_online.contains(&worker);

        let join = tokio::spawn(run_fake_worker(worker, script, log, exit_early, inbox_rx, events));

        Ok(Box::new(FakeHandle {
            worker,
            inbox: inbox_tx,
            join,
            log: Arc::clone(&self.log),
        }))
    }
}

async fn run_fake_worker(
    worker: WorkerId,
    script: Script,
    log: Arc<Mutex<SpawnLog>>,
    exit_early: bool,
    mut inbox: mpsc::UnboundedReceiver<MessageToWorker>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::Online { worker }).await;
    if exit_early {
        let _ = events.send(WorkerEvent::Exited { worker, code: Some(1) }).await;
        return;
    }

    while let Some(MessageToWorker::ProcessTask { task }) = inbox.recv().await {
        {
            let mut log = log.lock().unwrap();
            log.assignments.push((worker, task.to_string()));
            log.in_flight += 1;
            log.max_in_flight = log.max_in_flight.max(log.in_flight);
        }

        let mut finished = false;
        // Count the task as done before its completion can reach the master.
        let finish = |finished: &mut bool| {
            if !std::mem::replace(finished, true) {
                log.lock().unwrap().in_flight -= 1;
            }
        };

        for reply in script(worker, &task) {
            let event = match reply {
                Reply::Send(message) => {
                    if matches!(message, MessageFromWorker::TaskCompleted { .. }) {
                        finish(&mut finished);
                    }
                    WorkerEvent::Message { worker, message }
                }
                Reply::Invalid(detail) => WorkerEvent::Invalid { worker, detail },
                Reply::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    continue;
                }
                Reply::Crash => {
                    finish(&mut finished);
                    let _ = events.send(WorkerEvent::Exited { worker, code: None }).await;
                    return;
                }
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
        finish(&mut finished);
    }
}

struct FakeHandle {
    worker: WorkerId,
    inbox: mpsc::UnboundedSender<MessageToWorker>,
    join: JoinHandle<()>,
    log: Arc<Mutex<SpawnLog>>,
}

impl WorkerHandle for FakeHandle {
    fn send(&mut self, message: MessageToWorker) -> Result<()> {
        self.inbox.send(message).map_err(|_| {
            TaskherdError::ProtocolViolation(format!("fake worker #{} is gone", self.worker))
        })
    }

    fn kill(&mut self) {
        self.join.abort();
        self.log.lock().unwrap().killed.push(self.worker);
    }
}
