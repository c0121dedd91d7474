// src/lib.rs

pub mod cli;
pub mod compile;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod persist;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, Instrument};

use crate::cli::{CliArgs, CliCommand, LogLevel, RunArgs, WorkerArgs};
use crate::compile::{render_command, shell_compile_fn};
use crate::config::{load_and_validate, max_workers_from_env, PlanFile};
use crate::dag::{EntryPointGraph, Task, TaskQueue};
use crate::engine::{CompletionRouter, ShutdownHandle, WorkerId};
use crate::exec::{
    run_stdio_worker, ClusterExecutor, InProcessSpawner, NoopLock, ProcessSpawner,
    SingleProcessExecutor, WorkerSpawner, WORKER_ID_ENV,
};
use crate::fs::RealFileSystem;
use crate::persist::{FsStateWriter, StateWriter};
use crate::types::WorkerMode;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        CliCommand::Run(run_args) => run_plan(run_args, args.log_level).await,
        CliCommand::Worker(worker_args) => run_worker(worker_args).await,
    }
}

/// `taskherd run`: load the plan and compile every task.
///
/// This wires together:
/// - plan loading and task construction
/// - the completion router for the configured failure policy
/// - the serial executor, or a worker pool of tasks or child processes
/// - Ctrl-C handling
pub async fn run_plan(args: RunArgs, log_level: Option<LogLevel>) -> Result<()> {
    let plan = load_and_validate(&args.plan)
        .with_context(|| format!("loading plan {}", args.plan))?;
    let tasks = plan.build_tasks()?;
    let graph = plan.graph();

    if args.dry_run {
        print_dry_run(&plan, tasks, &graph)?;
        return Ok(());
    }

    let max_workers = args
        .workers
        .or_else(max_workers_from_env)
        .unwrap_or(plan.cluster.max_workers);
    let policy = args.on_failure.unwrap_or(plan.cluster.on_failure);
    let writer: Arc<dyn StateWriter> = Arc::new(FsStateWriter::new(RealFileSystem));
    let create_router = {
        let writer = Arc::clone(&writer);
        move |_: &[Task]| CompletionRouter::for_policy(policy, writer)
    };
    let compile = shell_compile_fn(plan.compile.cmd.clone());

    info!(
        tasks = tasks.len(),
        max_workers,
        ?policy,
        "processing entry-points"
    );

    if max_workers == 1 {
        let executor = SingleProcessExecutor::new(NoopLock, writer, compile);
        interrupt_on_ctrl_c(executor.shutdown_handle());
        tokio::task::spawn_blocking(move || executor.execute(tasks, &graph, create_router))
            .await
            .context("serial executor panicked")??;
        return Ok(());
    }

    if args.in_process || plan.cluster.mode == WorkerMode::Task {
        let spawner = InProcessSpawner::new(compile);
        execute_cluster(max_workers, spawner, writer, tasks, &graph, create_router).await
    } else {
        let spawner = ProcessSpawner::current_exe(worker_args(&args.plan, log_level))?;
        execute_cluster(max_workers, spawner, writer, tasks, &graph, create_router).await
    }
}

/// `taskherd worker`: serve tasks for a master over stdin/stdout.
pub async fn run_worker(args: WorkerArgs) -> Result<()> {
    let plan = load_and_validate(&args.plan)
        .with_context(|| format!("loading plan {}", args.plan))?;
    let worker = std::env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(WorkerId)
        .unwrap_or(WorkerId(0));

    debug!(worker = %worker, "worker process starting");
    run_stdio_worker(worker, &shell_compile_fn(plan.compile.cmd))
        .instrument(logging::worker_span(worker))
        .await
}

async fn execute_cluster<S, F>(
    max_workers: usize,
    spawner: S,
    writer: Arc<dyn StateWriter>,
    tasks: Vec<Task>,
    graph: &EntryPointGraph,
    create_router: F,
) -> Result<()>
where
    S: WorkerSpawner,
    F: FnOnce(&[Task]) -> CompletionRouter,
{
    let executor = ClusterExecutor::new(max_workers, spawner, NoopLock, writer);
    // Workers are stopped before `execute` returns.
    interrupt_on_ctrl_c(executor.shutdown_handle());

    executor.execute(tasks, graph, create_router).await?;
    Ok(())
}

/// Abort the run through `shutdown` on Ctrl-C.
fn interrupt_on_ctrl_c(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        shutdown.shutdown();
    });
}

/// Arguments that make a child of this executable run as a worker.
fn worker_args(plan: &str, log_level: Option<LogLevel>) -> Vec<String> {
    let mut args = vec!["worker".to_string(), "--plan".to_string(), plan.to_string()];
    if let Some(level) = log_level {
        args.push("--log-level".to_string());
        args.push(level.as_str().to_string());
    }
    args
}

/// Simple dry-run output: print the plan, each task's command and the
/// prioritized queue.
fn print_dry_run(plan: &PlanFile, tasks: Vec<Task>, graph: &EntryPointGraph) -> Result<()> {
    println!("taskherd dry-run");
    println!("  cluster.max_workers = {}", plan.cluster.max_workers);
    println!("  cluster.on_failure = {:?}", plan.cluster.on_failure);
    println!("  cluster.mode = {:?}", plan.cluster.mode);
    println!();

    println!("tasks ({}):", tasks.len());
    for task in &tasks {
        println!("  - {task}");
        println!("      cmd: {}", render_command(&plan.compile.cmd, task));
        println!("      state: {}", task.entry_point.manifest_path().display());
    }
    println!();

    let queue = TaskQueue::new(tasks, graph)?;
    print!("{queue}");

    debug!("dry-run complete (no execution)");
    Ok(())
}
