// src/exec/mod.rs

//! Worker execution layer.
//!
//! - [`backend`] provides the `WorkerSpawner`/`WorkerHandle` traits the
//!   master talks to, so tests can replace real workers with fakes.
//! - [`worker`] is the worker-side task loop around the compile function.
//! - [`in_process`] hosts workers as Tokio tasks.
//! - [`process`] hosts workers as child processes; [`stdio`] is the loop
//!   those children run.
//! - [`executor`] wires queue, master and lock together for one run.

pub mod backend;
pub mod executor;
pub mod in_process;
pub mod process;
pub mod stdio;
pub mod worker;

pub use backend::{WorkerHandle, WorkerSpawner};
pub use executor::{ClusterExecutor, NoopLock, RunLock, SingleProcessExecutor};
pub use in_process::{InProcessSpawner, PANIC_EXIT_CODE};
pub use process::{ProcessSpawner, WORKER_ID_ENV};
pub use stdio::{run_stdio_worker, serve};
pub use worker::{ClusterWorker, CompileFn, CreateCompileFn, TaskReporter};
