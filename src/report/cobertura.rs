//! Cobertura coverage report generation.
//!
//! Converts a parsed coverage profile into the Cobertura XML schema that
//! CI coverage dashboards ingest. Files group into `<package>` elements by
//! directory; each file becomes a `<class>` with per-line hit counts.

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use super::Reporter;
use crate::coverage::{CoverageProfile, FileCoverage};
use crate::dispatch::{RunSummary, Task, TaskResult};

/// Reporter that converts the tool's coverage profile when the run
/// completes.
///
/// The profile is read only after all tasks have finished, since workers
/// append to it throughout the run. Missing or unreadable profiles are
/// logged and abort only the coverage report.
pub struct CoberturaReporter {
    profile_path: PathBuf,
    output_path: PathBuf,
}

impl CoberturaReporter {
    pub fn new(profile_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            profile_path,
            output_path,
        }
    }
}

#[async_trait]
impl Reporter for CoberturaReporter {
    async fn on_plan_complete(&self, _tasks: &[Task]) {}

    async fn on_task_start(&self, _task: &Task) {}

    async fn on_task_complete(&self, _result: &TaskResult) {}

    async fn on_run_complete(&self, _summary: &RunSummary) {
        let profile = match CoverageProfile::load(&self.profile_path) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(
                    "failed to read coverage profile {}: {e}",
                    self.profile_path.display()
                );
                return;
            }
        };

        match generate_xml(&profile) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("failed to create report directory: {e}");
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("failed to write coverage report: {e}");
                } else {
                    tracing::info!(
                        "coverage report written to {}",
                        self.output_path.display()
                    );
                }
            }
            Err(e) => {
                tracing::error!("failed to generate coverage report: {e}");
            }
        }
    }
}

/// Generate the Cobertura XML document for a parsed profile.
pub fn generate_xml(profile: &CoverageProfile) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut coverage = BytesStart::new("coverage");
    coverage.push_attribute(("line-rate", format_rate(profile.line_rate()).as_str()));
    coverage.push_attribute(("branch-rate", "0.0"));
    coverage.push_attribute(("lines-covered", profile.lines_covered().to_string().as_str()));
    coverage.push_attribute(("lines-valid", profile.lines_valid().to_string().as_str()));
    coverage.push_attribute(("timestamp", chrono::Utc::now().timestamp().to_string().as_str()));
    coverage.push_attribute(("version", "1.0"));
    writer.write_event(Event::Start(coverage))?;

    writer.write_event(Event::Start(BytesStart::new("sources")))?;
    writer.write_event(Event::Start(BytesStart::new("source")))?;
    writer.write_event(Event::Text(quick_xml::events::BytesText::new(".")))?;
    writer.write_event(Event::End(BytesEnd::new("source")))?;
    writer.write_event(Event::End(BytesEnd::new("sources")))?;

    writer.write_event(Event::Start(BytesStart::new("packages")))?;
    for (package, files) in profile.by_package() {
        write_package(&mut writer, &package, &files)?;
    }
    writer.write_event(Event::End(BytesEnd::new("packages")))?;

    writer.write_event(Event::End(BytesEnd::new("coverage")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_package<W: std::io::Write>(
    writer: &mut Writer<W>,
    package: &str,
    files: &[(&str, &FileCoverage)],
) -> anyhow::Result<()> {
    let covered: u64 = files.iter().map(|(_, f)| f.lines_covered()).sum();
    let valid: u64 = files.iter().map(|(_, f)| f.lines_valid()).sum();
    let rate = if valid == 0 {
        0.0
    } else {
        covered as f64 / valid as f64
    };

    let mut element = BytesStart::new("package");
    element.push_attribute(("name", package));
    element.push_attribute(("line-rate", format_rate(rate).as_str()));
    element.push_attribute(("branch-rate", "0.0"));
    writer.write_event(Event::Start(element))?;

    writer.write_event(Event::Start(BytesStart::new("classes")))?;
    for (path, coverage) in files {
        write_class(writer, path, coverage)?;
    }
    writer.write_event(Event::End(BytesEnd::new("classes")))?;

    writer.write_event(Event::End(BytesEnd::new("package")))?;
    Ok(())
}

fn write_class<W: std::io::Write>(
    writer: &mut Writer<W>,
    path: &str,
    coverage: &FileCoverage,
) -> anyhow::Result<()> {
    let base = path.rsplit('/').next().unwrap_or(path);
    let name = base
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(base);

    let mut element = BytesStart::new("class");
    element.push_attribute(("name", name));
    element.push_attribute(("filename", path));
    element.push_attribute(("line-rate", format_rate(coverage.line_rate()).as_str()));
    element.push_attribute(("branch-rate", "0.0"));
    writer.write_event(Event::Start(element))?;

    writer.write_event(Event::Empty(BytesStart::new("methods")))?;

    writer.write_event(Event::Start(BytesStart::new("lines")))?;
    for (number, hits) in &coverage.lines {
        let mut line = BytesStart::new("line");
        line.push_attribute(("number", number.to_string().as_str()));
        line.push_attribute(("hits", hits.to_string().as_str()));
        writer.write_event(Event::Empty(line))?;
    }
    writer.write_event(Event::End(BytesEnd::new("lines")))?;

    writer.write_event(Event::End(BytesEnd::new("class")))?;
    Ok(())
}

fn format_rate(rate: f64) -> String {
    format!("{:.4}", rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\
mode: count
services/auth/token.go:10.2,11.9 2 5
services/auth/token.go:13.2,13.30 1 0
cmd/main.go:8.1,8.20 1 3
";

    #[test]
    fn emits_overall_rates_and_totals() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        let xml = generate_xml(&profile).unwrap();

        assert!(xml.contains(r#"line-rate="0.7500""#));
        assert!(xml.contains(r#"lines-covered="3""#));
        assert!(xml.contains(r#"lines-valid="4""#));
        assert!(xml.contains("<sources>"));
    }

    #[test]
    fn groups_classes_under_packages() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        let xml = generate_xml(&profile).unwrap();

        assert!(xml.contains(r#"<package name="cmd""#));
        assert!(xml.contains(r#"<package name="services/auth""#));
        assert!(xml.contains(r#"filename="services/auth/token.go""#));
        assert!(xml.contains(r#"<class name="token""#));
    }

    #[test]
    fn lines_carry_hit_counts() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        let xml = generate_xml(&profile).unwrap();

        assert!(xml.contains(r#"<line number="10" hits="5"/>"#));
        assert!(xml.contains(r#"<line number="13" hits="0"/>"#));
    }

    #[test]
    fn empty_profile_still_renders() {
        let xml = generate_xml(&CoverageProfile::default()).unwrap();
        assert!(xml.contains(r#"line-rate="0.0000""#));
        assert!(xml.contains("<packages>"));
    }
}
