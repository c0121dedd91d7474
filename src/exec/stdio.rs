// src/exec/stdio.rs

//! Worker-side loop for process workers: JSON lines in on stdin, JSON lines
//! out on stdout.

use anyhow::anyhow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::protocol::{decode_line, encode_line};
use crate::engine::{MessageFromWorker, MessageToWorker, WorkerId};
use crate::exec::worker::{ClusterWorker, CreateCompileFn};

/// Serve tasks read from `reader` until it reaches EOF, writing every
/// message for the master to `writer`.
///
/// A line that does not decode is answered with an `Error` message, which
/// the master treats as fatal.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    worker: WorkerId,
    create_compile_fn: &CreateCompileFn,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel::<MessageToWorker>();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<MessageFromWorker>();

    let cluster_worker = ClusterWorker::new(worker, create_compile_fn, outbox_tx.clone());
    let mut worker_task = tokio::spawn(cluster_worker.run(inbox_rx));

    let mut lines = reader.lines();
    let mut inbox = Some(inbox_tx);

    loop {
        tokio::select! {
            line = lines.next_line(), if inbox.is_some() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match decode_line::<MessageToWorker>(&line) {
                        Ok(message) => {
                            if let Some(tx) = &inbox {
                                let _ = tx.send(message);
                            }
                        }
                        Err(err) => {
                            warn!(worker = %worker, error = %err, "undecodable message from master");
                            let _ = outbox_tx.send(MessageFromWorker::Error {
                                detail: format!("invalid message from master: {err}"),
                            });
                        }
                    },
                    None => {
                        debug!(worker = %worker, "master closed stdin");
                        inbox = None;
                    }
                }
            }
            Some(message) = outbox_rx.recv() => {
                write_message(&mut writer, &message).await?;
            }
            joined = &mut worker_task => {
                while let Ok(message) = outbox_rx.try_recv() {
                    write_message(&mut writer, &message).await?;
                }
                return match joined {
                    Ok(result) => result,
                    // Let the process die of the panic so the master sees its exit status.
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(err) => Err(anyhow!("worker task failed: {err}")),
                };
            }
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &MessageFromWorker,
) -> anyhow::Result<()> {
    writer.write_all(encode_line(message)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Entry point of the `taskherd worker` subcommand.
pub async fn run_stdio_worker(
    worker: WorkerId,
    create_compile_fn: &CreateCompileFn,
) -> anyhow::Result<()> {
    serve(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        worker,
        create_compile_fn,
    )
    .await
}
