// src/exec/process.rs

//! Workers hosted as child OS processes speaking JSON lines on stdio.
//!
//! The child is expected to run [`serve`](super::stdio::serve), which is what
//! the hidden `taskherd worker` subcommand does.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::protocol::{decode_line, encode_line};
use crate::engine::{MessageFromWorker, MessageToWorker, WorkerEvent, WorkerId};
use crate::errors::Result;
use crate::exec::backend::{WorkerHandle, WorkerSpawner};

/// Environment variable carrying the worker id into the child process.
pub const WORKER_ID_ENV: &str = "TASKHERD_WORKER_ID";

/// Spawns `program args...` once per worker.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable with `args` (e.g. `worker --plan ...`).
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe().context("locating the current executable")?;
        Ok(Self::new(program, args))
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &mut self,
        worker: WorkerId,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(WORKER_ID_ENV, worker.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning worker #{worker} ({:?})", self.program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin of worker #{worker} was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout of worker #{worker} was not captured"))?;

        info!(worker = %worker, pid = ?child.id(), "worker process started");

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        tokio::spawn(write_messages(worker, stdin, inbox_rx));
        tokio::spawn(supervise(worker, child, stdout, events, cancel_rx));

        Ok(Box::new(ProcessHandle {
            inbox: inbox_tx,
            cancel: Some(cancel_tx),
        }))
    }
}

struct ProcessHandle {
    inbox: mpsc::UnboundedSender<MessageToWorker>,
    cancel: Option<oneshot::Sender<()>>,
}

impl WorkerHandle for ProcessHandle {
    fn send(&mut self, message: MessageToWorker) -> Result<()> {
        self.inbox
            .send(message)
            .map_err(|_| anyhow!("worker stdin is closed"))?;
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Serialize queued messages onto the child's stdin. Dropping stdin when
/// the inbox closes tells the child to exit.
async fn write_messages(
    worker: WorkerId,
    mut stdin: ChildStdin,
    mut inbox: mpsc::UnboundedReceiver<MessageToWorker>,
) {
    while let Some(message) = inbox.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(err) => {
                error!(worker = %worker, error = %err, "failed to encode message for worker");
                continue;
            }
        };

        if let Err(err) = stdin.write_all(line.as_bytes()).await {
            debug!(worker = %worker, error = %err, "worker stdin closed");
            break;
        }
        if let Err(err) = stdin.flush().await {
            debug!(worker = %worker, error = %err, "failed to flush worker stdin");
            break;
        }
    }
}

/// Relay the child's stdout to the master and report its exit.
///
/// If the cancel channel fires the child is killed and **no** `Exited`
/// event is sent.
async fn supervise(
    worker: WorkerId,
    mut child: Child,
    stdout: ChildStdout,
    events: mpsc::Sender<WorkerEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    if events.send(WorkerEvent::Online { worker }).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(worker = %worker, error = %err, "failed to read worker stdout");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let event = match decode_line::<MessageFromWorker>(&line) {
                    Ok(message) => WorkerEvent::Message { worker, message },
                    Err(err) => WorkerEvent::Invalid {
                        worker,
                        detail: format!("{err} (line: {line})"),
                    },
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            _ = &mut cancel_rx => {
                kill_child(worker, &mut child).await;
                return;
            }
        }
    }

    tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(worker = %worker, error = %err, "failed to wait for worker process");
                    None
                }
            };
            debug!(worker = %worker, ?code, "worker process exited");
            let _ = events.send(WorkerEvent::Exited { worker, code }).await;
        }
        _ = &mut cancel_rx => {
            kill_child(worker, &mut child).await;
        }
    }
}

async fn kill_child(worker: WorkerId, child: &mut Child) {
    debug!(worker = %worker, "killing worker process");
    if let Err(err) = child.kill().await {
        warn!(worker = %worker, error = %err, "failed to kill worker process");
    }
}
