// tests/master_core.rs

use std::sync::Arc;

use taskherd::dag::{EntryPointGraph, Task, TaskDependencies, TaskId, TaskQueue, TaskStatus};
use taskherd::engine::{
    CompletionRouter, MasterCommand, MasterCore, MasterStep, MessageFromWorker, MessageToWorker,
    TaskOutcome, WorkerEvent, WorkerId, WorkerRegistry, WorkerState,
};
use taskherd::errors::TaskherdError;
use taskherd::fs::mock::MockFileSystem;
use taskherd::persist::{FsStateWriter, StateChange, StateWriter};
use taskherd::types::FailurePolicy;
use taskherd_test_utils::builders::task;

fn core_with(tasks: Vec<Task>, policy: FailurePolicy, max_workers: usize) -> MasterCore {
    let writer: Arc<dyn StateWriter> = Arc::new(FsStateWriter::new(MockFileSystem::new()));
    let queue = TaskQueue::new(tasks, &EntryPointGraph::new()).unwrap();
    let router = CompletionRouter::for_policy(policy, Arc::clone(&writer));
    MasterCore::new(queue, router, writer, max_workers).unwrap()
}

fn spawned(step: &MasterStep) -> Vec<WorkerId> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            MasterCommand::Spawn(id) => Some(*id),
            MasterCommand::Send { .. } => None,
        })
        .collect()
}

fn sent(step: &MasterStep) -> Vec<(WorkerId, String)> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            MasterCommand::Send {
                worker,
                message: MessageToWorker::ProcessTask { task },
            } => Some((*worker, task.format_property.clone())),
            MasterCommand::Spawn(_) => None,
        })
        .collect()
}

fn completed(worker: WorkerId) -> WorkerEvent {
    WorkerEvent::Message {
        worker,
        message: MessageFromWorker::TaskCompleted {
            outcome: TaskOutcome::AllFormatsCompiled,
            message: None,
        },
    }
}

#[test]
fn zero_workers_is_rejected() {
    let writer: Arc<dyn StateWriter> = Arc::new(FsStateWriter::new(MockFileSystem::new()));
    let queue = TaskQueue::new(vec![], &EntryPointGraph::new()).unwrap();
    let router = CompletionRouter::for_policy(FailurePolicy::Abort, Arc::clone(&writer));
    assert!(matches!(
        MasterCore::new(queue, router, writer, 0),
        Err(TaskherdError::ConfigError(_))
    ));
}

#[test]
fn empty_queue_finishes_without_spawning() {
    let mut core = core_with(vec![], FailurePolicy::Abort, 2);
    let step = core.start().unwrap();
    assert!(step.finished);
    assert!(step.commands.is_empty());
}

#[test]
fn single_task_uses_a_single_worker() {
    let mut core = core_with(vec![task("pkg1", "main", false)], FailurePolicy::Abort, 1);

    let step = core.start().unwrap();
    assert_eq!(spawned(&step), vec![WorkerId(1)]);

    let step = core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    assert_eq!(sent(&step), vec![(WorkerId(1), "main".to_string())]);
    assert!(spawned(&step).is_empty());

    let step = core.step(completed(WorkerId(1))).unwrap();
    assert!(step.finished);
    assert_eq!(core.queue().status(TaskId(0)), TaskStatus::Completed);
}

#[test]
fn pool_grows_only_while_unassigned_work_remains() {
    let mut core = core_with(
        vec![task("pkg1", "main", false), task("pkg2", "main", false)],
        FailurePolicy::Abort,
        4,
    );

    assert_eq!(spawned(&core.start().unwrap()), vec![WorkerId(1)]);

    // W1 takes the first task; a second worker is requested for the other.
    let step = core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    assert_eq!(sent(&step).len(), 1);
    assert_eq!(spawned(&step), vec![WorkerId(2)]);

    // W2 takes the last task; nothing is left, so no third worker.
    let step = core.step(WorkerEvent::Online { worker: WorkerId(2) }).unwrap();
    assert_eq!(sent(&step).len(), 1);
    assert!(spawned(&step).is_empty());
    assert_eq!(core.registry().live_count(), 2);
}

#[test]
fn ceiling_of_one_runs_independent_tasks_sequentially() {
    let mut core = core_with(
        vec![task("pkg1", "main", false), task("pkg2", "main", false)],
        FailurePolicy::Abort,
        1,
    );
    core.start().unwrap();

    let step = core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    assert_eq!(sent(&step).len(), 1);
    assert!(spawned(&step).is_empty());
    assert_eq!(core.queue().in_progress_count(), 1);

    let step = core.step(completed(WorkerId(1))).unwrap();
    assert_eq!(sent(&step), vec![(WorkerId(1), "main".to_string())]);
    assert_eq!(core.queue().in_progress_count(), 1);

    assert!(core.step(completed(WorkerId(1))).unwrap().finished);
}

#[test]
fn idle_exit_is_replaced_transparently() {
    let mut core = core_with(
        vec![task("pkg1", "main", false), task("pkg2", "main", false)],
        FailurePolicy::Abort,
        2,
    );
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(2) }).unwrap();
    core.step(completed(WorkerId(2))).unwrap();
    assert_eq!(core.registry().idle_workers(), vec![WorkerId(2)]);

    let step = core
        .step(WorkerEvent::Exited {
            worker: WorkerId(2),
            code: Some(1),
        })
        .unwrap();
    assert_eq!(spawned(&step), vec![WorkerId(3)]);
    assert_eq!(core.registry().live_count(), 2);

    core.step(WorkerEvent::Online { worker: WorkerId(3) }).unwrap();
    assert!(core.step(completed(WorkerId(1))).unwrap().finished);
}

#[test]
fn busy_exit_names_the_in_flight_task() {
    let mut core = core_with(vec![task("pkg1", "fesm2015", true)], FailurePolicy::Abort, 1);
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();

    let err = core
        .step(WorkerEvent::Exited {
            worker: WorkerId(1),
            code: None,
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Worker #1 crashed while processing task {entryPoint: pkg1, formatProperty: fesm2015, processDts: true}"
    );
}

#[test]
fn protocol_violations_are_fatal() {
    let mut core = core_with(vec![task("pkg1", "main", false)], FailurePolicy::Abort, 1);
    core.start().unwrap();

    assert!(matches!(
        core.step(completed(WorkerId(9))),
        Err(TaskherdError::ProtocolViolation(_))
    ));

    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    assert!(matches!(
        core.step(WorkerEvent::Online { worker: WorkerId(1) }),
        Err(TaskherdError::ProtocolViolation(_))
    ));
    assert!(matches!(
        core.step(WorkerEvent::Invalid {
            worker: WorkerId(1),
            detail: "garbage".into()
        }),
        Err(TaskherdError::ProtocolViolation(_))
    ));
}

#[test]
fn completion_from_an_idle_worker_is_rejected() {
    let mut core = core_with(
        vec![task("pkg1", "main", false), task("pkg2", "main", false)],
        FailurePolicy::Abort,
        2,
    );
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    core.step(completed(WorkerId(1))).unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(2) }).unwrap();

    // Both tasks went out; W1 finished its second one and is now idle.
    core.step(completed(WorkerId(1))).ok();
    let idle = core.registry().idle_workers();
    assert!(!idle.is_empty());
    assert!(matches!(
        core.step(completed(idle[0])),
        Err(TaskherdError::ProtocolViolation(_))
    ));
}

#[test]
fn worker_error_message_is_fatal() {
    let mut core = core_with(vec![task("pkg1", "main", false)], FailurePolicy::Abort, 1);
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();

    let err = core
        .step(WorkerEvent::Message {
            worker: WorkerId(1),
            message: MessageFromWorker::Error {
                detail: "compiler exploded".into(),
            },
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Error on worker #1: compiler exploded");
}

#[test]
fn state_updates_must_target_the_assigned_entry_point() {
    let mut core = core_with(vec![task("pkg1", "main", false)], FailurePolicy::Abort, 1);
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();

    let ok = core.step(WorkerEvent::Message {
        worker: WorkerId(1),
        message: MessageFromWorker::UpdatePersistentState {
            changes: vec![StateChange::new(["main"], "index.js")],
            target_path: "pkg1/package.json".into(),
        },
    });
    assert!(ok.is_ok());

    let err = core
        .step(WorkerEvent::Message {
            worker: WorkerId(1),
            message: MessageFromWorker::UpdatePersistentState {
                changes: vec![],
                target_path: "pkg2/package.json".into(),
            },
        })
        .unwrap_err();
    assert!(matches!(err, TaskherdError::UnexpectedStateTarget { .. }));
}

#[test]
fn continue_policy_skips_dependents_and_finishes() {
    let mut core = core_with(
        vec![
            task("pkg1", "fesm2015", true),
            task("pkg1", "main", false),
            task("pkg3", "main", false),
        ],
        FailurePolicy::Continue,
        1,
    );
    core.start().unwrap();
    let step = core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();
    assert_eq!(sent(&step), vec![(WorkerId(1), "fesm2015".to_string())]);

    let step = core
        .step(WorkerEvent::Message {
            worker: WorkerId(1),
            message: MessageFromWorker::TaskCompleted {
                outcome: TaskOutcome::Failed,
                message: Some("boom".into()),
            },
        })
        .unwrap();
    assert_eq!(core.queue().status(TaskId(1)), TaskStatus::Skipped);
    assert_eq!(sent(&step).len(), 1);

    assert!(core.step(completed(WorkerId(1))).unwrap().finished);
}

#[test]
fn abort_policy_turns_failure_into_an_error() {
    let mut core = core_with(vec![task("pkg1", "main", false)], FailurePolicy::Abort, 1);
    core.start().unwrap();
    core.step(WorkerEvent::Online { worker: WorkerId(1) }).unwrap();

    let err = core
        .step(WorkerEvent::Message {
            worker: WorkerId(1),
            message: MessageFromWorker::TaskCompleted {
                outcome: TaskOutcome::Failed,
                message: Some("bad input".into()),
            },
        })
        .unwrap_err();
    assert!(matches!(err, TaskherdError::TaskFailed { .. }));
}

#[test]
fn unsatisfiable_queue_is_a_deadlock() {
    let tasks = vec![task("pkg1", "main", false), task("pkg2", "main", false)];
    // Each task blocks the other.
    let deps = TaskDependencies::from_edges([(TaskId(0), TaskId(1)), (TaskId(1), TaskId(0))]);
    let queue = TaskQueue::from_parts(tasks, deps).unwrap();
    let writer: Arc<dyn StateWriter> = Arc::new(FsStateWriter::new(MockFileSystem::new()));
    let router = CompletionRouter::for_policy(FailurePolicy::Abort, Arc::clone(&writer));
    let mut core = MasterCore::new(queue, router, writer, 1).unwrap();

    core.start().unwrap();
    let err = core
        .step(WorkerEvent::Online { worker: WorkerId(1) })
        .unwrap_err();
    assert!(matches!(err, TaskherdError::Deadlock(summary) if summary.contains("blocked by")));
}

// ---- worker registry ----

#[test]
fn lifecycle_transitions() {
    let mut reg = WorkerRegistry::new();
    let w1 = reg.allocate();
    let w2 = reg.allocate();
    assert_eq!(reg.live_count(), 2);
    assert_eq!(reg.state(w1), None);

    reg.come_online(w1).unwrap();
    reg.assign(w1, TaskId(0));
    assert_eq!(reg.busy_workers(), vec![w1]);
    assert!(reg.idle_workers().is_empty());

    reg.come_online(w2).unwrap();
    assert_eq!(reg.idle_workers(), vec![w2]);

    assert_eq!(reg.mark_dead(w1), Some(WorkerState::Busy(TaskId(0))));
    assert_eq!(reg.live_count(), 1);
    reg.remove(w1);
    assert_eq!(reg.state(w1), None);
}

#[test]
fn coming_online_twice_or_unannounced_is_a_protocol_violation() {
    let mut reg = WorkerRegistry::new();
    let w1 = reg.allocate();
    reg.come_online(w1).unwrap();
    assert!(matches!(
        reg.come_online(w1),
        Err(TaskherdError::ProtocolViolation(_))
    ));
    assert!(reg.come_online(WorkerId(42)).is_err());
}
