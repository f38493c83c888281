//! Run reporting and output generation.

pub mod cobertura;
pub mod xunit;

use async_trait::async_trait;

use crate::dispatch::{RunSummary, Task, TaskResult, TaskStatus};

pub use cobertura::CoberturaReporter;
pub use xunit::XUnitReporter;

/// A reporter receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once planning is complete, with every task in the run.
    async fn on_plan_complete(&self, tasks: &[Task]);

    /// Called when a worker picks up a task.
    async fn on_task_start(&self, task: &Task);

    /// Called when a task's result has been collected.
    async fn on_task_complete(&self, result: &TaskResult);

    /// Called when all results are in.
    async fn on_run_complete(&self, summary: &RunSummary);
}

/// A reporter that does nothing (for tests or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_plan_complete(&self, _tasks: &[Task]) {}
    async fn on_task_start(&self, _task: &Task) {}
    async fn on_task_complete(&self, _result: &TaskResult) {}
    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// A reporter that fans events out to multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_plan_complete(&self, tasks: &[Task]) {
        for reporter in &self.reporters {
            reporter.on_plan_complete(tasks).await;
        }
    }

    async fn on_task_start(&self, task: &Task) {
        for reporter in &self.reporters {
            reporter.on_task_start(task).await;
        }
    }

    async fn on_task_complete(&self, result: &TaskResult) {
        for reporter in &self.reporters {
            reporter.on_task_complete(result).await;
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        for reporter in &self.reporters {
            reporter.on_run_complete(summary).await;
        }
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }

    fn styled_status(status: TaskStatus) -> console::StyledObject<&'static str> {
        match status {
            TaskStatus::Passed => console::style(status.label()).green(),
            TaskStatus::Failed => console::style(status.label()).red(),
            TaskStatus::BuildFailed => console::style(status.label()).red().bold(),
            TaskStatus::TimedOut => console::style(status.label()).yellow(),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_plan_complete(&self, tasks: &[Task]) {
        let excluded = tasks.iter().filter(|t| t.fully_excluded()).count();
        if excluded > 0 {
            println!("Planned {} packages ({} excluded)", tasks.len(), excluded);
        } else {
            println!("Planned {} packages", tasks.len());
        }

        let pb = indicatif::ProgressBar::new(tasks.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn on_task_start(&self, task: &Task) {
        if self.verbose {
            println!("Running: {}", task.package);
        }
    }

    async fn on_task_complete(&self, result: &TaskResult) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.inc(1);

            if self.verbose || result.status != TaskStatus::Passed {
                pb.println(format!(
                    "{:<5} {} ({:.1}s)",
                    Self::styled_status(result.status),
                    result.package,
                    result.duration.as_secs_f64()
                ));
            }
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Results:");
        println!("  Packages:   {}", summary.total);
        println!("  Passed:     {}", console::style(summary.passed).green());
        println!("  Failed:     {}", console::style(summary.failed).red());
        println!(
            "  Build fail: {}",
            console::style(summary.build_failed).red().bold()
        );
        println!(
            "  Timed out:  {}",
            console::style(summary.timed_out).yellow()
        );
        if summary.excluded_tests > 0 {
            println!(
                "  Excluded:   {} tests",
                console::style(summary.excluded_tests).yellow()
            );
        }
        println!("  Duration:   {:.1}s", summary.duration.as_secs_f64());

        if summary.success() {
            println!();
            println!("{}", console::style("All packages passed.").green().bold());
            return;
        }

        println!();
        println!("{}", console::style("Some packages failed.").red().bold());
        println!();
        for result in &summary.results {
            if result.status == TaskStatus::Passed {
                continue;
            }
            println!(
                "  {:<5} {}",
                Self::styled_status(result.status),
                result.package
            );
            for line in result.output.lines() {
                println!("        {}", console::style(line).dim());
            }
        }
    }
}
