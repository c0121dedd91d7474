// src/compile.rs

//! Shell-command compile function used by the CLI.
//!
//! The plan's `[compile] cmd` is a template; each task runs it with these
//! placeholders substituted:
//! - `{entry_point}`: entry-point name
//! - `{path}`: entry-point directory
//! - `{format}`: format property being compiled
//! - `{typings}`: `true` if the task also produces type declarations

use std::process::Command;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::dag::Task;
use crate::engine::TaskOutcome;
use crate::exec::{CompileFn, CreateCompileFn, TaskReporter};

/// Substitute the task's fields into `template`.
pub fn render_command(template: &str, task: &Task) -> String {
    template
        .replace("{entry_point}", &task.entry_point.name)
        .replace("{path}", &task.entry_point.path.to_string_lossy())
        .replace("{format}", &task.format_property)
        .replace("{typings}", if task.process_dts { "true" } else { "false" })
}

/// Compile function factory running `template` through the platform shell.
///
/// Exit status 0 reports `AllFormatsCompiled`; any other status reports
/// `Failed` with the command's stderr. Failing to start the shell at all is
/// an error of the compile machinery.
pub fn shell_compile_fn(template: impl Into<String>) -> CreateCompileFn {
    let template: Arc<str> = Arc::from(template.into());

    Arc::new(move |reporter: TaskReporter| -> CompileFn {
        let template = Arc::clone(&template);
        Box::new(move |task: &Task| -> anyhow::Result<()> {
            let cmd = render_command(&template, task);
            info!(task = %task, cmd = %cmd, "compiling");

            let output = shell(&cmd)
                .output()
                .with_context(|| format!("running compile command for {task}"))?;

            if output.status.success() {
                debug!(task = %task, "compile command succeeded");
                reporter.task_completed(task, TaskOutcome::AllFormatsCompiled, None);
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(task = %task, status = %output.status, "compile command failed");
                let message = if stderr.is_empty() {
                    format!("compile command exited with {}", output.status)
                } else {
                    stderr
                };
                reporter.task_completed(task, TaskOutcome::Failed, Some(message));
            }
            Ok(())
        })
    })
}

fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}
