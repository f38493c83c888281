//! Task dispatch.
//!
//! One task per package fans out over a bounded pool of workers; a single
//! collector gathers exactly one result per task before the run completes.
//!
//! # Guarantees
//!
//! - Every enqueued task produces exactly one result: no loss, no
//!   duplication. Results arrive in completion order, not submission order.
//! - A task whose entire test list was excluded short-circuits to a passed
//!   result without spawning a subprocess.
//! - A task exceeding the run deadline is killed and recorded as timed out;
//!   a worker's subprocess failure never aborts sibling tasks.
//! - Workers share nothing mutable beyond the channels and a per-run
//!   scratch directory that is removed when the run ends.

pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::classify::CaseRecord;
use crate::config::Config;
use crate::report::Reporter;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that abort a dispatch run.
///
/// Per-task failures are never errors here; they are carried in
/// [`TaskResult`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to create scratch directory: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("invalid run command `{command}`: {source}")]
    CommandParse {
        command: String,
        source: shell_words::ParseError,
    },

    #[error("run command is empty")]
    EmptyCommand,

    #[error("collected {received} results for {expected} tasks")]
    Incomplete { expected: usize, received: usize },
}

/// A unit of work: one package plus the tests to run in it.
///
/// Tasks are immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Package identifier, as produced by the lister.
    pub package: String,

    /// Specific tests to run. Empty means the package's full suite.
    pub tests: Vec<String>,

    /// Tests removed by the exclusion table, carried for reporting.
    pub excluded: Vec<String>,
}

impl Task {
    /// A task running the package's full suite.
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            tests: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Set the specific tests to run.
    pub fn with_tests(mut self, tests: Vec<String>) -> Self {
        self.tests = tests;
        self
    }

    /// Record the tests the exclusion table removed.
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// True when exclusion left nothing to run.
    pub fn fully_excluded(&self) -> bool {
        self.tests.is_empty() && !self.excluded.is_empty()
    }
}

/// Final status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The build step failed; no tests ran.
    BuildFailed,
    /// Every test passed (or the whole task was excluded).
    Passed,
    /// At least one test failed.
    Failed,
    /// The invocation exceeded its deadline and was killed.
    TimedOut,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Passed)
    }

    /// Short label for console output.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Passed => "PASS",
            TaskStatus::Failed => "FAIL",
            TaskStatus::BuildFailed => "BUILD",
            TaskStatus::TimedOut => "TIME",
        }
    }
}

/// Outcome of one task. Produced exactly once per enqueued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub package: String,
    pub status: TaskStatus,

    /// Captured tool output (stdout then stderr).
    pub output: String,

    pub duration: Duration,

    /// Tests the exclusion table removed from this task.
    pub excluded: Vec<String>,

    /// Per-test records, when the tool emitted structured events.
    pub cases: Vec<CaseRecord>,

    /// Whether a tool invocation actually happened. False for tasks that
    /// short-circuited (fully excluded) or never launched.
    pub spawned: bool,
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub build_failed: usize,
    pub timed_out: usize,
    /// Total number of excluded test entries across all tasks.
    pub excluded_tests: usize,
    pub duration: Duration,
    pub results: Vec<TaskResult>,
}

impl RunSummary {
    /// Fold results into counters.
    pub fn from_results(results: Vec<TaskResult>, duration: Duration) -> Self {
        let count = |status: TaskStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            passed: count(TaskStatus::Passed),
            failed: count(TaskStatus::Failed),
            build_failed: count(TaskStatus::BuildFailed),
            timed_out: count(TaskStatus::TimedOut),
            excluded_tests: results.iter().map(|r| r.excluded.len()).sum(),
            duration,
            results,
        }
    }

    /// The run succeeded only if every task passed.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.build_failed == 0 && self.timed_out == 0
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Explicit per-run configuration handed to every worker.
///
/// Everything a worker needs travels here by value; there is no ambient
/// run state.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Number of workers pulling from the task queue.
    pub workers: usize,
    /// Deadline for a single task's invocation.
    pub timeout: Duration,
    /// Echo output lines as they arrive.
    pub stream_output: bool,
    /// Working directory for tool invocations.
    pub working_dir: Option<PathBuf>,
    /// Extra environment for tool invocations.
    pub env: Vec<(String, String)>,
    /// Run command template with `{package}`/`{tests}` placeholders.
    pub run_command: String,
    /// Whether stdout carries structured JSON test events.
    pub json_events: bool,
    /// Unique id of this run.
    pub run_id: String,
    /// Scratch directory shared by all workers, exported as
    /// `HARRIER_TMPDIR`.
    pub scratch_dir: PathBuf,
}

/// Fans tasks out to workers and collects their results.
pub struct Dispatcher {
    context: RunContext,
    // Held so the scratch directory outlives the run.
    _scratch: Option<tempfile::TempDir>,
}

impl Dispatcher {
    /// Create a dispatcher for one run, with a fresh scratch directory.
    pub fn new(config: &Config) -> DispatchResult<Self> {
        let scratch = tempfile::Builder::new().prefix("harrier-").tempdir()?;
        let context = RunContext {
            workers: config.harrier.workers.max(1),
            timeout: Duration::from_secs(config.harrier.timeout_secs),
            stream_output: config.harrier.stream_output,
            working_dir: config.harrier.working_dir.clone(),
            env: config
                .tool
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            run_command: config.tool.run_command.clone(),
            json_events: config.tool.json_events,
            run_id: uuid::Uuid::new_v4().to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        };
        Ok(Self {
            context,
            _scratch: Some(scratch),
        })
    }

    /// Assemble a dispatcher from an explicit context. The caller owns the
    /// scratch directory's lifetime.
    pub fn from_context(context: RunContext) -> Self {
        Self {
            context,
            _scratch: None,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Run all tasks to completion and aggregate their results.
    ///
    /// The task queue is bounded by the worker count; the result channel is
    /// sized to the task count so no worker ever blocks on delivery.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        reporter: Arc<dyn Reporter>,
    ) -> DispatchResult<RunSummary> {
        let start = Instant::now();
        let total = tasks.len();

        if total == 0 {
            let summary = RunSummary::from_results(Vec::new(), start.elapsed());
            reporter.on_run_complete(&summary).await;
            return Ok(summary);
        }

        let workers = self.context.workers.max(1).min(total);
        info!(
            run_id = %self.context.run_id,
            tasks = total,
            workers,
            "dispatching tasks"
        );

        let (task_tx, task_rx) = mpsc::channel::<Task>(workers);
        let (result_tx, mut result_rx) = mpsc::channel::<TaskResult>(total);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let context = Arc::new(self.context.clone());

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let context = context.clone();
            let reporter = reporter.clone();
            handles.push(tokio::spawn(worker::run_loop(
                context, task_rx, result_tx, reporter,
            )));
        }
        drop(result_tx);

        // The bounded queue applies backpressure, so feeding happens on its
        // own task while the collector drains results.
        let feeder = tokio::spawn(async move {
            for task in tasks {
                if task_tx.send(task).await.is_err() {
                    break;
                }
            }
        });

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            debug!(package = %result.package, status = ?result.status, "task finished");
            reporter.on_task_complete(&result).await;
            results.push(result);
        }

        feeder.await.ok();
        for handle in handles {
            handle.await.ok();
        }

        if results.len() != total {
            return Err(DispatchError::Incomplete {
                expected: total,
                received: results.len(),
            });
        }

        let summary = RunSummary::from_results(results, start.elapsed());
        reporter.on_run_complete(&summary).await;
        Ok(summary)
    }
}
