//! Subprocess execution at the tool boundary.
//!
//! External tools are black boxes to the harness: argv in, exit code plus
//! stdout/stderr out. This module provides the [`Command`] builder, the
//! captured [`ExecOutput`], and a line-streamed executor that enforces a
//! per-invocation deadline.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors that can occur while launching a subprocess.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command to execute.
#[derive(Debug, Clone)]
pub struct Command {
    /// The program to run.
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// Working directory (optional).
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Deadline for the whole invocation (optional).
    pub timeout: Option<Duration>,
}

impl Command {
    /// Create a new command.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Build a command from an argv list. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program).args(args.iter().cloned()))
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the deadline.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Render the command for log messages.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A line of output from a running command.
#[derive(Debug, Clone)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    /// The line text, regardless of which stream it came from.
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }
}

/// Callback invoked for each output line as it is read.
pub type LineCallback = Arc<dyn Fn(&OutputLine) + Send + Sync>;

/// Captured outcome of one command invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code (0 typically means success). `-1` when unavailable.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// Whether the deadline expired before the process finished.
    pub timed_out: bool,
}

impl ExecOutput {
    /// Check if the command succeeded (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Combined stdout followed by stderr, for report output fields.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

/// Run a command to completion, capturing output line by line.
pub async fn run(cmd: &Command) -> ExecResult<ExecOutput> {
    run_with_callback(cmd, None).await
}

/// Run a command, invoking `on_line` for each output line as it arrives.
///
/// Both stdout and stderr are read concurrently so a chatty tool cannot
/// deadlock on a full pipe. If the command's deadline expires, the process
/// is killed and the partial output captured so far is returned with
/// `timed_out` set.
pub async fn run_with_callback(
    cmd: &Command,
    on_line: Option<LineCallback>,
) -> ExecResult<ExecOutput> {
    let start = Instant::now();

    let mut process = tokio::process::Command::new(&cmd.program);
    process.args(&cmd.args);
    if let Some(dir) = &cmd.working_dir {
        process.current_dir(dir);
    }
    for (key, value) in &cmd.env {
        process.env(key, value);
    }
    process.stdout(Stdio::piped());
    process.stderr(Stdio::piped());
    process.kill_on_drop(true);

    let mut child = process.spawn().map_err(|source| ExecError::Spawn {
        program: cmd.program.clone(),
        source,
    })?;

    let stdout = child.stdout.take().unwrap();
    let stderr = child.stderr.take().unwrap();

    let stdout_lines = LinesStream::new(BufReader::new(stdout).lines())
        .map(|line| OutputLine::Stdout(line.unwrap_or_default()));
    let stderr_lines = LinesStream::new(BufReader::new(stderr).lines())
        .map(|line| OutputLine::Stderr(line.unwrap_or_default()));
    let mut merged = stream::select(stdout_lines, stderr_lines);

    let mut out_buf = String::new();
    let mut err_buf = String::new();

    let drain = async {
        while let Some(line) = merged.next().await {
            if let Some(callback) = &on_line {
                callback(&line);
            }
            match &line {
                OutputLine::Stdout(s) => {
                    out_buf.push_str(s);
                    out_buf.push('\n');
                }
                OutputLine::Stderr(s) => {
                    err_buf.push_str(s);
                    err_buf.push('\n');
                }
            }
        }
        child.wait().await
    };

    let (exit_code, timed_out) = match cmd.timeout {
        Some(limit) => match tokio::time::timeout(limit, drain).await {
            Ok(status) => (status?.code().unwrap_or(-1), false),
            Err(_) => {
                // Deadline expired: reap the process and keep partial output.
                child.start_kill().ok();
                child.wait().await.ok();
                (-1, true)
            }
        },
        None => (drain.await?.code().unwrap_or(-1), false),
    };

    Ok(ExecOutput {
        exit_code,
        stdout: out_buf,
        stderr: err_buf,
        duration: start.elapsed(),
        timed_out,
    })
}
