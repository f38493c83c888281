//! Output classification for finished tasks.
//!
//! Turns a captured tool invocation into a [`TaskStatus`]. Two sources are
//! consulted:
//!
//! - **Structured events**: when the tool runs with machine-readable output
//!   enabled, stdout carries newline-delimited JSON test events and per-test
//!   outcomes are extracted from those.
//! - **Exit heuristics**: the build step conventionally exits with code 2
//!   and prefixes its diagnostics with `# <package>`; either marks the task
//!   as a build failure rather than a test failure.
//!
//! Timeouts and exit code 2 always win over whatever the output text says.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::TaskStatus;
use crate::exec::ExecOutput;

/// Exit code the build step uses to signal a compilation failure.
pub const BUILD_FAILURE_EXIT: i32 = 2;

/// Classify a finished invocation from its exit code and output text.
pub fn classify(package: &str, output: &ExecOutput) -> TaskStatus {
    if output.timed_out {
        return TaskStatus::TimedOut;
    }
    if output.exit_code == 0 {
        return TaskStatus::Passed;
    }
    if output.exit_code == BUILD_FAILURE_EXIT {
        return TaskStatus::BuildFailed;
    }
    if has_build_diagnostic(package, &output.stdout) || has_build_diagnostic(package, &output.stderr)
    {
        TaskStatus::BuildFailed
    } else {
        TaskStatus::Failed
    }
}

/// Build diagnostics are prefixed with `# <package>` by the compiler.
fn has_build_diagnostic(package: &str, text: &str) -> bool {
    let exact = format!("# {package}");
    let prefixed = format!("# {package} ");
    text.lines()
        .map(str::trim_end)
        .any(|line| line == exact || line.starts_with(&prefixed))
}

/// Action field of a structured test event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Start,
    Run,
    Pause,
    Cont,
    Output,
    Bench,
    Pass,
    Fail,
    Skip,
}

/// A machine-readable test event, one JSON object per stdout line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestEvent {
    pub action: EventAction,

    #[serde(default)]
    pub package: Option<String>,

    #[serde(default)]
    pub test: Option<String>,

    /// Elapsed seconds, present on terminal actions.
    #[serde(default)]
    pub elapsed: Option<f64>,

    #[serde(default)]
    pub output: Option<String>,
}

/// Parse newline-delimited JSON test events from captured stdout.
///
/// Tools interleave human-readable noise with the event stream, so lines
/// that do not parse as events are skipped rather than treated as errors.
pub fn parse_events(stdout: &str) -> Vec<TestEvent> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect()
}

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Per-test record extracted from an event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Test name as reported by the tool.
    pub name: String,
    pub outcome: CaseOutcome,
    pub duration: Duration,
    /// Output attributed to this test by the event stream.
    pub output: String,
}

#[derive(Default)]
struct CaseBuilder {
    outcome: Option<CaseOutcome>,
    elapsed: f64,
    output: String,
}

/// Fold an event stream into per-test records, in first-seen order.
///
/// Only tests that reached a terminal action (pass, fail, skip) produce a
/// record; a test that merely started before the run was cut short does not.
pub fn collect_cases(events: &[TestEvent]) -> Vec<CaseRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, CaseBuilder> = HashMap::new();

    for event in events {
        let Some(name) = event.test.as_deref() else {
            continue;
        };
        if !builders.contains_key(name) {
            order.push(name.to_string());
        }
        let builder = builders.entry(name.to_string()).or_default();

        match event.action {
            EventAction::Output => {
                if let Some(text) = &event.output {
                    builder.output.push_str(text);
                }
            }
            EventAction::Pass => builder.outcome = Some(CaseOutcome::Passed),
            EventAction::Fail => builder.outcome = Some(CaseOutcome::Failed),
            EventAction::Skip => builder.outcome = Some(CaseOutcome::Skipped),
            _ => {}
        }
        if let Some(elapsed) = event.elapsed {
            builder.elapsed = elapsed;
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let builder = builders.remove(&name)?;
            let outcome = builder.outcome?;
            Some(CaseRecord {
                name,
                outcome,
                duration: Duration::from_secs_f64(builder.elapsed.max(0.0)),
                output: builder.output,
            })
        })
        .collect()
}

/// Status plus per-test records for a finished task.
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: TaskStatus,
    pub cases: Vec<CaseRecord>,
}

/// Classify a finished invocation, consulting structured events when the
/// tool was configured to emit them.
pub fn classify_output(package: &str, output: &ExecOutput, json_events: bool) -> Classification {
    if json_events {
        let events = parse_events(&output.stdout);
        if !events.is_empty() {
            let cases = collect_cases(&events);
            let status = if output.timed_out {
                TaskStatus::TimedOut
            } else if output.exit_code == BUILD_FAILURE_EXIT {
                TaskStatus::BuildFailed
            } else if cases.iter().any(|c| c.outcome == CaseOutcome::Failed) {
                TaskStatus::Failed
            } else if output.exit_code == 0 {
                TaskStatus::Passed
            } else {
                // Non-zero exit with no failing case: fall back to the
                // text heuristics (the failure happened outside any test).
                classify(package, output)
            };
            return Classification { status, cases };
        }
    }

    Classification {
        status: classify(package, output),
        cases: Vec::new(),
    }
}
