// tests/workers.rs

use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinError;

use taskherd::compile::{render_command, shell_compile_fn};
use taskherd::dag::{EntryPoint, Task};
use taskherd::engine::protocol::{decode_line, encode_line};
use taskherd::engine::{MessageFromWorker, MessageToWorker, TaskOutcome, WorkerEvent, WorkerId};
use taskherd::exec::{
    serve, ClusterWorker, CompileFn, CreateCompileFn, InProcessSpawner, TaskReporter,
    WorkerSpawner, PANIC_EXIT_CODE,
};
use taskherd::persist::StateChange;
use taskherd_test_utils::builders::task;

fn completing(message: Option<&'static str>) -> CreateCompileFn {
    Arc::new(move |reporter: TaskReporter| -> CompileFn {
        Box::new(move |task: &Task| -> anyhow::Result<()> {
            reporter.task_completed(
                task,
                TaskOutcome::AllFormatsCompiled,
                message.map(str::to_string),
            );
            Ok(())
        })
    })
}

fn panicking() -> CreateCompileFn {
    Arc::new(|_reporter: TaskReporter| -> CompileFn {
        Box::new(|_task: &Task| -> anyhow::Result<()> { panic!("compiler bug") })
    })
}

fn process_task() -> MessageToWorker {
    MessageToWorker::ProcessTask {
        task: task("pkg1", "main", false),
    }
}

// ---- cluster worker ----

/// Run a worker on its own task for a single assignment.
async fn run_one(
    create: CreateCompileFn,
) -> (Result<anyhow::Result<()>, JoinError>, Vec<MessageFromWorker>) {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
    let worker = ClusterWorker::new(WorkerId(1), &create, outbox_tx);

    inbox_tx.send(process_task()).unwrap();
    drop(inbox_tx);
    let result = tokio::spawn(worker.run(inbox_rx)).await;

    let mut messages = Vec::new();
    while let Ok(message) = outbox_rx.try_recv() {
        messages.push(message);
    }
    (result, messages)
}

#[tokio::test]
async fn reports_completion_through_the_reporter() {
    let create: CreateCompileFn = Arc::new(|reporter: TaskReporter| -> CompileFn {
        Box::new(move |task: &Task| -> anyhow::Result<()> {
            reporter.update_persistent_state(
                vec![StateChange::new(["built"], true)],
                task.entry_point.manifest_path(),
            );
            reporter.task_completed(task, TaskOutcome::CompiledWithoutTypings, None);
            Ok(())
        })
    });

    let (result, messages) = run_one(create).await;
    assert!(result.unwrap().is_ok());
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1],
        MessageFromWorker::TaskCompleted {
            outcome: TaskOutcome::CompiledWithoutTypings,
            message: None
        }
    );
}

#[tokio::test]
async fn compile_errors_become_error_messages() {
    let create: CreateCompileFn = Arc::new(|_reporter: TaskReporter| -> CompileFn {
        Box::new(|_task: &Task| -> anyhow::Result<()> { Err(anyhow!("disk full")) })
    });

    let (result, messages) = run_one(create).await;
    assert!(result.unwrap().is_ok());
    assert_eq!(
        messages,
        vec![MessageFromWorker::Error {
            detail: "disk full".to_string()
        }]
    );
}

#[tokio::test]
async fn silent_compile_functions_are_reported() {
    let create: CreateCompileFn = Arc::new(|_reporter: TaskReporter| -> CompileFn {
        Box::new(|_task: &Task| -> anyhow::Result<()> { Ok(()) })
    });

    let (_, messages) = run_one(create).await;
    assert!(matches!(
        &messages[..],
        [MessageFromWorker::Error { detail }] if detail.contains("without reporting")
    ));
}

#[tokio::test]
async fn compile_panics_take_the_worker_task_down() {
    let (result, messages) = run_one(panicking()).await;
    assert!(result.unwrap_err().is_panic());
    assert!(messages.is_empty());
}

// ---- in-process backend ----

#[tokio::test]
async fn in_process_worker_forwards_online_and_messages() {
    let mut spawner = InProcessSpawner::new(completing(None));
    let (tx, mut rx) = mpsc::channel(8);

    let mut handle = spawner.spawn(WorkerId(7), tx).unwrap();
    assert_eq!(rx.recv().await, Some(WorkerEvent::Online { worker: WorkerId(7) }));

    handle.send(process_task()).unwrap();
    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Message {
            worker: WorkerId(7),
            message: MessageFromWorker::TaskCompleted {
                outcome: TaskOutcome::AllFormatsCompiled,
                message: None,
            },
        })
    );

    handle.kill();
}

#[tokio::test]
async fn panicking_in_process_worker_exits_with_the_panic_code() {
    let mut spawner = InProcessSpawner::new(panicking());
    let (tx, mut rx) = mpsc::channel(8);

    let mut handle = spawner.spawn(WorkerId(1), tx).unwrap();
    assert_eq!(rx.recv().await, Some(WorkerEvent::Online { worker: WorkerId(1) }));

    handle.send(process_task()).unwrap();
    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Exited {
            worker: WorkerId(1),
            code: Some(PANIC_EXIT_CODE),
        })
    );
}

// ---- process backend ----

#[cfg(unix)]
fn shell(script: &str) -> taskherd::exec::ProcessSpawner {
    taskherd::exec::ProcessSpawner::new("sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(unix)]
#[tokio::test]
async fn process_worker_relays_stdout_lines_and_exit_code() {
    let mut spawner =
        shell(r#"read line; echo '{"type":"task_completed","outcome":"all_formats_compiled"}'"#);
    let (tx, mut rx) = mpsc::channel(8);
    let mut handle = spawner.spawn(WorkerId(3), tx).unwrap();

    assert_eq!(rx.recv().await, Some(WorkerEvent::Online { worker: WorkerId(3) }));
    handle.send(process_task()).unwrap();

    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Message {
            worker: WorkerId(3),
            message: MessageFromWorker::TaskCompleted {
                outcome: TaskOutcome::AllFormatsCompiled,
                message: None,
            },
        })
    );
    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Exited {
            worker: WorkerId(3),
            code: Some(0),
        })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn undecodable_process_output_becomes_invalid_events() {
    let mut spawner = shell("echo 'not json'; exit 3");
    let (tx, mut rx) = mpsc::channel(8);
    let _handle = spawner.spawn(WorkerId(1), tx).unwrap();

    assert_eq!(rx.recv().await, Some(WorkerEvent::Online { worker: WorkerId(1) }));
    match rx.recv().await {
        Some(WorkerEvent::Invalid { worker, detail }) => {
            assert_eq!(worker, WorkerId(1));
            assert!(detail.contains("not json"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Exited {
            worker: WorkerId(1),
            code: Some(3),
        })
    );
}

// ---- stdio worker loop ----

#[tokio::test]
async fn stdio_worker_answers_tasks_and_exits_on_eof() {
    let (master_side, worker_side) = duplex(4096);
    let (worker_read, worker_write) = split(worker_side);
    let create = completing(Some("ok"));
    let server = tokio::spawn(async move {
        serve(BufReader::new(worker_read), worker_write, WorkerId(1), &create).await
    });

    let (master_read, mut master_write) = split(master_side);
    master_write
        .write_all(encode_line(&process_task()).unwrap().as_bytes())
        .await
        .unwrap();

    let mut lines = BufReader::new(master_read).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let message: MessageFromWorker = decode_line(&line).unwrap();
    assert_eq!(
        message,
        MessageFromWorker::TaskCompleted {
            outcome: TaskOutcome::AllFormatsCompiled,
            message: Some("ok".to_string()),
        }
    );

    master_write.shutdown().await.unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn stdio_worker_reports_garbage_input_as_an_error() {
    let (master_side, worker_side) = duplex(4096);
    let (worker_read, worker_write) = split(worker_side);
    let create = completing(None);
    let server = tokio::spawn(async move {
        serve(BufReader::new(worker_read), worker_write, WorkerId(1), &create).await
    });

    let (master_read, mut master_write) = split(master_side);
    master_write.write_all(b"{\"type\":\"reboot\"}\n").await.unwrap();

    let mut lines = BufReader::new(master_read).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let message: MessageFromWorker = decode_line(&line).unwrap();
    assert!(matches!(
        message,
        MessageFromWorker::Error { detail } if detail.starts_with("invalid message from master")
    ));

    master_write.shutdown().await.unwrap();
    server.await.unwrap().unwrap();
}

// ---- shell compile function ----

#[test]
fn renders_all_placeholders() {
    let task = Task::new(EntryPoint::new("core", "packages/core"), "fesm2015", true);
    assert_eq!(
        render_command("build {entry_point} {path} --format={format} --dts={typings}", &task),
        "build core packages/core --format=fesm2015 --dts=true"
    );
}

#[cfg(unix)]
#[test]
fn shell_exit_status_decides_the_outcome() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = TaskReporter::new(tx);
    let task = task("pkg1", "main", false);

    let mut ok = shell_compile_fn("true")(reporter.clone());
    ok(&task).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        MessageFromWorker::TaskCompleted {
            outcome: TaskOutcome::AllFormatsCompiled,
            message: None
        }
    );

    let mut failing = shell_compile_fn("echo broken {format} >&2; exit 2")(reporter);
    failing(&task).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        MessageFromWorker::TaskCompleted {
            outcome: TaskOutcome::Failed,
            message: Some("broken main".to_string())
        }
    );
}
