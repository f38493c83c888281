//! Worker loop: pull tasks, invoke the tool, classify the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use super::{DispatchError, DispatchResult, RunContext, Task, TaskResult, TaskStatus};
use crate::classify;
use crate::exec::{self, Command, LineCallback, OutputLine};
use crate::report::Reporter;

/// Pull tasks until the queue closes, pushing one result per task.
pub(crate) async fn run_loop(
    context: Arc<RunContext>,
    task_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    result_tx: mpsc::Sender<TaskResult>,
    reporter: Arc<dyn Reporter>,
) {
    loop {
        // Hold the lock only for the receive, not for the task itself.
        let task = { task_rx.lock().await.recv().await };
        let Some(task) = task else { break };

        reporter.on_task_start(&task).await;
        let result = execute(&context, &task).await;
        if result_tx.send(result).await.is_err() {
            break;
        }
    }
}

/// Execute a single task and produce its result.
///
/// A fully-excluded task passes immediately without a subprocess. All
/// other outcomes, including a failure to launch the tool at all, are
/// captured in the returned [`TaskResult`].
pub async fn execute(context: &RunContext, task: &Task) -> TaskResult {
    if task.fully_excluded() {
        return TaskResult {
            package: task.package.clone(),
            status: TaskStatus::Passed,
            output: String::new(),
            duration: Duration::ZERO,
            excluded: task.excluded.clone(),
            cases: Vec::new(),
            spawned: false,
        };
    }

    let cmd = match build_command(context, task) {
        Ok(cmd) => cmd,
        Err(err) => return invocation_failure(task, err.to_string()),
    };

    let output = match exec::run_with_callback(&cmd, stream_callback(context, task)).await {
        Ok(output) => output,
        Err(err) => {
            warn!(package = %task.package, "failed to invoke tool: {err}");
            return invocation_failure(task, format!("failed to invoke tool: {err}"));
        }
    };

    let classification = classify::classify_output(&task.package, &output, context.json_events);
    TaskResult {
        package: task.package.clone(),
        status: classification.status,
        output: output.combined(),
        duration: output.duration,
        excluded: task.excluded.clone(),
        cases: classification.cases,
        spawned: true,
    }
}

fn invocation_failure(task: &Task, message: String) -> TaskResult {
    TaskResult {
        package: task.package.clone(),
        status: TaskStatus::Failed,
        output: message,
        duration: Duration::ZERO,
        excluded: task.excluded.clone(),
        cases: Vec::new(),
        spawned: false,
    }
}

/// Substitute the task into the run command template and split it into an
/// executable command.
pub(crate) fn build_command(context: &RunContext, task: &Task) -> DispatchResult<Command> {
    let line = substitute(&context.run_command, task);
    let argv = shell_words::split(&line).map_err(|source| DispatchError::CommandParse {
        command: line.clone(),
        source,
    })?;

    let mut cmd = Command::from_argv(&argv)
        .ok_or(DispatchError::EmptyCommand)?
        .timeout(context.timeout)
        .env("HARRIER_RUN_ID", context.run_id.as_str())
        .env("HARRIER_TMPDIR", context.scratch_dir.display().to_string());
    for (key, value) in &context.env {
        cmd = cmd.env(key.clone(), value.clone());
    }
    if let Some(dir) = &context.working_dir {
        cmd = cmd.working_dir(dir.clone());
    }
    Ok(cmd)
}

fn substitute(template: &str, task: &Task) -> String {
    template
        .replace("{package}", &task.package)
        .replace("{tests}", &task.tests.join(" "))
}

fn stream_callback(context: &RunContext, task: &Task) -> Option<LineCallback> {
    if !context.stream_output {
        return None;
    }
    let package = task.package.clone();
    Some(Arc::new(move |line: &OutputLine| match line {
        OutputLine::Stdout(s) => println!("[{package}] {s}"),
        OutputLine::Stderr(s) => eprintln!("[{package}] {s}"),
    }))
}
