//! Configuration schema definitions for harrier.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── CoreConfig             - [harrier]: parallelism, deadline, working dir
//! ├── ToolConfig             - [tool]: the external tool contract
//! ├── ExclusionRuleConfig    - [[exclusions]]: known-failure rules (data)
//! └── ReportConfig           - [report]: output directory and report files
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for harrier.
///
/// # TOML Structure
///
/// ```toml
/// [harrier]
/// workers = 8
/// timeout_secs = 600
///
/// [tool]
/// list_command = "go list ./..."
/// run_command = "go test -json {package}"
/// json_events = true
///
/// [[exclusions]]
/// package = "third_party/.*"
///
/// [report]
/// output_dir = "test-results"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core execution settings.
    #[serde(default)]
    pub harrier: CoreConfig,

    /// The external tool the harness drives.
    pub tool: ToolConfig,

    /// Known-failure exclusion rules. Historical, host-specific judgment
    /// calls belong here as data, never in code.
    #[serde(default)]
    pub exclusions: Vec<ExclusionRuleConfig>,

    /// Report configuration (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `workers` | number of available CPUs |
/// | `timeout_secs` | 900 (15 minutes) |
/// | `working_dir` | None (current directory) |
/// | `stream_output` | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Number of worker tasks pulling from the task queue.
    ///
    /// Each worker runs one package's tests at a time. Default: the
    /// number of available CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for a single package's test invocation, in seconds.
    ///
    /// A task exceeding the deadline is killed and recorded as timed out;
    /// other tasks keep running. Default: 900.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Working directory for tool invocations.
    ///
    /// If unset, tools inherit the harness's current directory.
    pub working_dir: Option<PathBuf>,

    /// Echo tool output line by line as it arrives, in addition to
    /// capturing it. Output from parallel tasks will interleave.
    #[serde(default)]
    pub stream_output: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
            stream_output: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_timeout_secs() -> u64 {
    900 // 15 minutes
}

/// The contract with the external tool: argv in, exit code plus
/// stdout/stderr out.
///
/// Commands are strings split with shell quoting rules; `{package}` and
/// `{tests}` placeholders are substituted before splitting.
///
/// # Example
///
/// ```toml
/// [tool]
/// list_command = "go list ./..."
/// case_list_command = "go test {package} -list '.*'"
/// run_command = "go test -json {package} -run {tests}"
/// json_events = true
///
/// [tool.env]
/// CGO_ENABLED = "0"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolConfig {
    /// Command printing one package per line.
    pub list_command: String,

    /// Optional command printing one test name per line for `{package}`.
    ///
    /// When set, test names are enumerated up front so exclusion rules can
    /// be applied per test. When unset, each package runs its full suite
    /// and only package-wide exclusions apply.
    #[serde(default)]
    pub case_list_command: Option<String>,

    /// Command running `{tests}` (space-joined, empty for the full suite)
    /// in `{package}`.
    pub run_command: String,

    /// Whether the tool emits newline-delimited JSON test events on stdout.
    ///
    /// Structured events are preferred over scraping human-readable text;
    /// enable this whenever the tool supports it.
    #[serde(default)]
    pub json_events: bool,

    /// Extra environment variables for every tool invocation.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One known-failure exclusion rule.
///
/// Rules are data: the package and test fields are anchored regular
/// expressions, and the optional `os`/`arch` fields restrict the rule to
/// one platform. A rule with the default match-all test pattern excludes
/// the whole package.
///
/// # Example
///
/// ```toml
/// [[exclusions]]
/// package = "storage/raft"
/// test = "TestLeaderElection.*"
/// os = "macos"
/// reason = "timer resolution too coarse on laptop builders"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExclusionRuleConfig {
    /// Anchored regex over package paths.
    pub package: String,

    /// Anchored regex over test names. Default: match all (the rule
    /// excludes the entire package).
    #[serde(default = "default_match_all")]
    pub test: String,

    /// Apply only on this operating system (e.g. "linux", "macos").
    pub os: Option<String>,

    /// Apply only on this CPU architecture (e.g. "x86_64", "aarch64").
    pub arch: Option<String>,

    /// Why the exclusion exists. Not interpreted, but keep it current.
    pub reason: Option<String>,
}

/// Report output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory test reports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Write an xUnit XML report.
    #[serde(default = "default_true")]
    pub xunit: bool,

    /// File name of the xUnit report, under `output_dir`.
    #[serde(default = "default_xunit_file")]
    pub xunit_file: String,

    /// Write a Cobertura coverage report. Requires `coverage_profile`.
    #[serde(default)]
    pub cobertura: bool,

    /// File name of the Cobertura report, under `output_dir`.
    #[serde(default = "default_cobertura_file")]
    pub cobertura_file: String,

    /// Path to the text coverage profile the tool writes, if any.
    pub coverage_profile: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            xunit: true,
            xunit_file: default_xunit_file(),
            cobertura: false,
            cobertura_file: default_cobertura_file(),
            coverage_profile: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_true() -> bool {
    true
}

fn default_xunit_file() -> String {
    "xunit.xml".to_string()
}

fn default_cobertura_file() -> String {
    "cobertura.xml".to_string()
}

fn default_match_all() -> String {
    ".*".to_string()
}
