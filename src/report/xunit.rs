//! xUnit XML report generation.
//!
//! Generates the xUnit/JUnit XML schema CI systems ingest: one
//! `<testsuite>` per package, one `<testcase>` per test. Packages without
//! per-test records get a single synthetic case so build failures and
//! timeouts still show up in CI dashboards.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" time="4.210">
//!   <testsuite name="services/auth" tests="3" failures="1" errors="0" skipped="1" time="4.210">
//!     <testcase classname="services/auth" name="TestToken" time="0.120"/>
//!     <testcase classname="services/auth" name="TestRevoke" time="3.800">
//!       <failure message="TestRevoke failed" type="TestFailure">...</failure>
//!     </testcase>
//!     <testcase classname="services/auth" name="TestLegacy" time="0.000">
//!       <skipped/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::Reporter;
use crate::classify::CaseOutcome;
use crate::dispatch::{RunSummary, Task, TaskResult, TaskStatus};

/// Reporter that writes an xUnit XML file when the run completes.
///
/// Parent directories are created automatically. A write failure is logged
/// and aborts only the report, never the run.
pub struct XUnitReporter {
    output_path: PathBuf,
    timeout: Option<Duration>,
}

impl XUnitReporter {
    /// Creates a reporter writing to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            timeout: None,
        }
    }

    /// Record the run deadline so timeout messages can name it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Reporter for XUnitReporter {
    async fn on_plan_complete(&self, _tasks: &[Task]) {}

    async fn on_task_start(&self, _task: &Task) {}

    async fn on_task_complete(&self, _result: &TaskResult) {}

    async fn on_run_complete(&self, summary: &RunSummary) {
        match generate_xml(summary, self.timeout) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("failed to create report directory: {e}");
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("failed to write xUnit report: {e}");
                } else {
                    tracing::info!("xUnit report written to {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("failed to generate xUnit report: {e}");
            }
        }
    }
}

enum CaseKind {
    Passed,
    Failed { message: String, data: String },
    Error { message: String, data: String },
    Skipped,
}

struct Case {
    name: String,
    time: f64,
    kind: CaseKind,
}

/// Generate the xUnit XML document for a finished run.
pub fn generate_xml(summary: &RunSummary, timeout: Option<Duration>) -> anyhow::Result<String> {
    let suites: Vec<(&TaskResult, Vec<Case>)> = summary
        .results
        .iter()
        .map(|result| (result, suite_cases(result, timeout)))
        .collect();

    let total: usize = suites.iter().map(|(_, cases)| cases.len()).sum();
    let failures: usize = count_kind(&suites, |k| matches!(k, CaseKind::Failed { .. }));
    let errors: usize = count_kind(&suites, |k| matches!(k, CaseKind::Error { .. }));

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut testsuites = BytesStart::new("testsuites");
    testsuites.push_attribute(("tests", total.to_string().as_str()));
    testsuites.push_attribute(("failures", failures.to_string().as_str()));
    testsuites.push_attribute(("errors", errors.to_string().as_str()));
    testsuites.push_attribute(("time", format_time(summary.duration).as_str()));
    writer.write_event(Event::Start(testsuites))?;

    for (result, cases) in &suites {
        write_suite(&mut writer, result, cases)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn count_kind(suites: &[(&TaskResult, Vec<Case>)], pred: impl Fn(&CaseKind) -> bool) -> usize {
    suites
        .iter()
        .flat_map(|(_, cases)| cases.iter())
        .filter(|case| pred(&case.kind))
        .count()
}

fn write_suite<W: std::io::Write>(
    writer: &mut Writer<W>,
    result: &TaskResult,
    cases: &[Case],
) -> anyhow::Result<()> {
    let failures = cases
        .iter()
        .filter(|c| matches!(c.kind, CaseKind::Failed { .. }))
        .count();
    let errors = cases
        .iter()
        .filter(|c| matches!(c.kind, CaseKind::Error { .. }))
        .count();
    let skipped = cases
        .iter()
        .filter(|c| matches!(c.kind, CaseKind::Skipped))
        .count();

    let mut testsuite = BytesStart::new("testsuite");
    testsuite.push_attribute(("name", sanitize(&result.package).as_str()));
    testsuite.push_attribute(("tests", cases.len().to_string().as_str()));
    testsuite.push_attribute(("failures", failures.to_string().as_str()));
    testsuite.push_attribute(("errors", errors.to_string().as_str()));
    testsuite.push_attribute(("skipped", skipped.to_string().as_str()));
    testsuite.push_attribute(("time", format_time(result.duration).as_str()));
    writer.write_event(Event::Start(testsuite))?;

    for case in cases {
        write_case(writer, &result.package, case)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    package: &str,
    case: &Case,
) -> anyhow::Result<()> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", sanitize(package).as_str()));
    testcase.push_attribute(("name", sanitize(&case.name).as_str()));
    testcase.push_attribute(("time", format!("{:.3}", case.time).as_str()));

    match &case.kind {
        CaseKind::Passed => {
            writer.write_event(Event::Empty(testcase))?;
        }
        CaseKind::Failed { message, data } => {
            writer.write_event(Event::Start(testcase))?;
            let mut failure = BytesStart::new("failure");
            failure.push_attribute(("message", sanitize(message).as_str()));
            failure.push_attribute(("type", "TestFailure"));
            writer.write_event(Event::Start(failure))?;
            writer.write_event(Event::Text(BytesText::new(&sanitize(data))))?;
            writer.write_event(Event::End(BytesEnd::new("failure")))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        CaseKind::Error { message, data } => {
            writer.write_event(Event::Start(testcase))?;
            let mut error = BytesStart::new("error");
            error.push_attribute(("message", sanitize(message).as_str()));
            error.push_attribute(("type", "BuildFailure"));
            writer.write_event(Event::Start(error))?;
            writer.write_event(Event::Text(BytesText::new(&sanitize(data))))?;
            writer.write_event(Event::End(BytesEnd::new("error")))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        CaseKind::Skipped => {
            writer.write_event(Event::Start(testcase))?;
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
    }

    Ok(())
}

/// Build the case list for one package's suite.
fn suite_cases(result: &TaskResult, timeout: Option<Duration>) -> Vec<Case> {
    let mut cases = Vec::new();

    if !result.cases.is_empty() {
        for record in &result.cases {
            let kind = match record.outcome {
                CaseOutcome::Passed => CaseKind::Passed,
                CaseOutcome::Failed => CaseKind::Failed {
                    message: format!("{} failed", record.name),
                    data: record.output.clone(),
                },
                CaseOutcome::Skipped => CaseKind::Skipped,
            };
            cases.push(Case {
                name: record.name.clone(),
                time: record.duration.as_secs_f64(),
                kind,
            });
        }
    } else if result.spawned || result.status != TaskStatus::Passed {
        // No per-test records: one synthetic case carries the outcome.
        let kind = match result.status {
            TaskStatus::Passed => CaseKind::Passed,
            TaskStatus::Failed => CaseKind::Failed {
                message: format!("{} failed", result.package),
                data: result.output.clone(),
            },
            TaskStatus::BuildFailed => CaseKind::Error {
                message: format!("{} failed to build", result.package),
                data: result.output.clone(),
            },
            TaskStatus::TimedOut => CaseKind::Failed {
                message: match timeout {
                    Some(limit) => format!("timed out after {}s", limit.as_secs()),
                    None => format!("timed out after {:.1}s", result.duration.as_secs_f64()),
                },
                data: result.output.clone(),
            },
        };
        let name = match result.status {
            TaskStatus::BuildFailed => "build".to_string(),
            _ => short_name(&result.package),
        };
        cases.push(Case {
            name,
            time: result.duration.as_secs_f64(),
            kind,
        });
    }

    for excluded in &result.excluded {
        cases.push(Case {
            name: excluded.clone(),
            time: 0.0,
            kind: CaseKind::Skipped,
        });
    }

    cases
}

fn short_name(package: &str) -> String {
    package
        .rsplit('/')
        .next()
        .unwrap_or(package)
        .to_string()
}

fn format_time(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Strip characters that are invalid in XML 1.0 documents. Markup escaping
/// itself is handled by the writer.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CaseRecord;

    fn result(package: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            package: package.to_string(),
            status,
            output: String::new(),
            duration: Duration::from_millis(1500),
            excluded: Vec::new(),
            cases: Vec::new(),
            spawned: true,
        }
    }

    fn summary(results: Vec<TaskResult>) -> RunSummary {
        RunSummary::from_results(results, Duration::from_secs(4))
    }

    #[test]
    fn per_test_records_become_testcases() {
        let mut r = result("services/auth", TaskStatus::Failed);
        r.cases = vec![
            CaseRecord {
                name: "TestToken".to_string(),
                outcome: CaseOutcome::Passed,
                duration: Duration::from_millis(120),
                output: String::new(),
            },
            CaseRecord {
                name: "TestRevoke".to_string(),
                outcome: CaseOutcome::Failed,
                duration: Duration::from_millis(80),
                output: "assertion failed".to_string(),
            },
        ];

        let xml = generate_xml(&summary(vec![r]), None).unwrap();
        assert!(xml.contains(r#"<testsuite name="services/auth" tests="2" failures="1""#));
        assert!(xml.contains(r#"<testcase classname="services/auth" name="TestToken" time="0.120"/>"#));
        assert!(xml.contains(r#"message="TestRevoke failed""#));
        assert!(xml.contains("assertion failed"));
    }

    #[test]
    fn build_failure_is_an_error_case() {
        let mut r = result("pkg/broken", TaskStatus::BuildFailed);
        r.output = "# pkg/broken\nundefined: Frobnicate".to_string();

        let xml = generate_xml(&summary(vec![r]), None).unwrap();
        assert!(xml.contains(r#"name="build""#));
        assert!(xml.contains(r#"type="BuildFailure""#));
        assert!(xml.contains("undefined: Frobnicate"));
        assert!(xml.contains(r#"errors="1""#));
    }

    #[test]
    fn timeout_message_names_the_deadline() {
        let r = result("pkg/slow", TaskStatus::TimedOut);
        let xml = generate_xml(&summary(vec![r]), Some(Duration::from_secs(600))).unwrap();
        assert!(xml.contains("timed out after 600s"));
        assert!(xml.contains(r#"type="TestFailure""#));
    }

    #[test]
    fn excluded_tests_are_skipped_cases() {
        let mut r = result("pkg/flaky", TaskStatus::Passed);
        r.spawned = false;
        r.duration = Duration::ZERO;
        r.excluded = vec!["TestA".to_string(), "TestB".to_string()];

        let xml = generate_xml(&summary(vec![r]), None).unwrap();
        assert!(xml.contains(r#"tests="2""#));
        assert!(xml.contains(r#"skipped="2""#));
        assert!(xml.contains(r#"name="TestA""#));
        assert!(xml.contains("<skipped/>"));
        // No synthetic passed case for a suite that never ran.
        assert!(!xml.contains(r#"name="flaky""#));
    }

    #[test]
    fn markup_in_output_is_escaped() {
        let mut r = result("pkg/a", TaskStatus::Failed);
        r.output = "expected <nil> & got <err>".to_string();

        let xml = generate_xml(&summary(vec![r]), None).unwrap();
        assert!(xml.contains("&lt;nil&gt; &amp; got"));
    }

    #[test]
    fn totals_roll_up_across_suites() {
        let results = vec![
            result("pkg/a", TaskStatus::Passed),
            result("pkg/b", TaskStatus::Failed),
            result("pkg/c", TaskStatus::BuildFailed),
        ];
        let xml = generate_xml(&summary(results), None).unwrap();
        assert!(xml.contains(r#"<testsuites tests="3" failures="1" errors="1" time="4.000">"#));
    }
}
