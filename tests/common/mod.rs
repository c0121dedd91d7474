#![allow(dead_code)]

use std::sync::Arc;

use taskherd::dag::{EntryPointGraph, Task};
use taskherd::engine::CompletionRouter;
use taskherd::errors::Result;
use taskherd::exec::ClusterExecutor;
use taskherd::types::FailurePolicy;
use taskherd_test_utils::fake_spawner::FakeSpawner;
use taskherd_test_utils::recorders::{RecordingLock, RecordingWriter};

pub use taskherd_test_utils::builders::{graph, task};
pub use taskherd_test_utils::{init_tracing, with_timeout};

/// What a cluster run left behind.
pub struct RunReport {
    pub result: Result<()>,
    pub spawner: FakeSpawner,
    pub writer: RecordingWriter,
    pub lock: RecordingLock,
}

/// Run `tasks` on a pool of fake workers.
pub async fn run_cluster(
    max_workers: usize,
    spawner: FakeSpawner,
    tasks: Vec<Task>,
    graph: &EntryPointGraph,
    policy: FailurePolicy,
) -> RunReport {
    let writer = RecordingWriter::new();
    let lock = RecordingLock::new();
    let executor = ClusterExecutor::new(
        max_workers,
        spawner.clone(),
        lock.clone(),
        Arc::new(writer.clone()),
    );

    let router_writer = writer.clone();
    let result = with_timeout(executor.execute(tasks, graph, move |_: &[Task]| {
        CompletionRouter::for_policy(policy, Arc::new(router_writer))
    }))
    .await;

    RunReport {
        result,
        spawner,
        writer,
        lock,
    }
}
