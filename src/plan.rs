//! Run planning: resolve package patterns into concrete tasks.
//!
//! Planning is the init phase of a run. It enumerates packages, optionally
//! enumerates each package's test names, applies the exclusion table, and
//! selects the requested shard. Any failure here aborts the run before a
//! single task is enqueued.

use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::Task;
use crate::exclude::ExclusionTable;
use crate::exec::{self, Command, ExecError};
use crate::pkg::{self, PackageError, PackageLister, PackagePattern};

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that abort planning (and with it, the run).
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("invalid case list command `{command}`: {source}")]
    CommandParse {
        command: String,
        source: shell_words::ParseError,
    },

    #[error("case list command is empty")]
    EmptyCommand,

    #[error("case list for {package} exited with code {exit_code}: {stderr}")]
    CaseListFailed {
        package: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Marker recorded when a whole package is excluded, rather than
/// individual tests.
pub const WHOLE_PACKAGE: &str = "*";

/// Builds the task list for one run.
pub struct RunPlanner<'a> {
    config: &'a Config,
    table: &'a ExclusionTable,
}

impl<'a> RunPlanner<'a> {
    pub fn new(config: &'a Config, table: &'a ExclusionTable) -> Self {
        Self { config, table }
    }

    /// Resolve patterns into one task per matched package.
    ///
    /// With `shard = Some((part, parts))`, only the packages assigned to
    /// that shard are planned.
    pub async fn plan(
        &self,
        patterns: &[PackagePattern],
        shard: Option<(usize, usize)>,
    ) -> PlanResult<Vec<Task>> {
        let lister = PackageLister::from_config(self.config);
        let mut packages = lister.list(patterns).await?;

        if let Some((part, parts)) = shard {
            let before = packages.len();
            packages = pkg::select_shard(&packages, part, parts)?;
            info!(
                part,
                parts,
                selected = packages.len(),
                of = before,
                "shard selected"
            );
        }

        let mut tasks = Vec::with_capacity(packages.len());
        for package in packages {
            tasks.push(self.task_for(&package).await?);
        }
        Ok(tasks)
    }

    async fn task_for(&self, package: &str) -> PlanResult<Task> {
        if self.table.excludes_package(package) {
            debug!(package, "package excluded");
            return Ok(Task::new(package).with_excluded(vec![WHOLE_PACKAGE.to_string()]));
        }

        let Some(template) = &self.config.tool.case_list_command else {
            // No test enumeration: the package runs its full suite.
            return Ok(Task::new(package));
        };

        let cases = self.enumerate_cases(template, package).await?;
        let (runnable, excluded) = self.table.partition(package, &cases);

        if excluded.is_empty() {
            // Nothing excluded, so skip the explicit test list and let the
            // tool run the suite its own way.
            return Ok(Task::new(package));
        }
        debug!(
            package,
            excluded = excluded.len(),
            runnable = runnable.len(),
            "exclusions applied"
        );
        Ok(Task::new(package)
            .with_tests(runnable)
            .with_excluded(excluded))
    }

    /// Run the case list command for one package, one test name per line.
    async fn enumerate_cases(&self, template: &str, package: &str) -> PlanResult<Vec<String>> {
        let line = template.replace("{package}", package);
        let argv = shell_words::split(&line).map_err(|source| PlanError::CommandParse {
            command: line.clone(),
            source,
        })?;
        let mut cmd = Command::from_argv(&argv).ok_or(PlanError::EmptyCommand)?;
        if let Some(dir) = &self.config.harrier.working_dir {
            cmd = cmd.working_dir(dir.clone());
        }
        for (key, value) in &self.config.tool.env {
            cmd = cmd.env(key.clone(), value.clone());
        }

        let output = exec::run(&cmd).await?;
        if !output.success() {
            return Err(PlanError::CaseListFailed {
                package: package.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExclusionRuleConfig, load_config_str};
    use crate::exclude::Platform;

    fn config(extra: &str) -> Config {
        load_config_str(&format!(
            r#"
            [harrier]
            [tool]
            list_command = "printf 'alpha\nbeta\nthird_party/lib\n'"
            run_command = "run {{package}}"
            {extra}
        "#
        ))
        .unwrap()
    }

    fn rule(package: &str, test: &str) -> ExclusionRuleConfig {
        ExclusionRuleConfig {
            package: package.to_string(),
            test: test.to_string(),
            os: None,
            arch: None,
            reason: None,
        }
    }

    #[test]
    fn plans_one_task_per_package() {
        let config = config("");
        let table = ExclusionTable::empty(Platform::current());
        let planner = RunPlanner::new(&config, &table);

        let tasks = tokio_test::block_on(planner.plan(&[], None)).unwrap();
        let packages: Vec<&str> = tasks.iter().map(|t| t.package.as_str()).collect();
        assert_eq!(packages, vec!["alpha", "beta", "third_party/lib"]);
        assert!(tasks.iter().all(|t| !t.fully_excluded()));
    }

    #[test]
    fn package_wide_exclusion_short_circuits() {
        let config = config("");
        let table = ExclusionTable::compile(
            &[rule("third_party/.*", ".*")],
            Platform::current(),
        )
        .unwrap();
        let planner = RunPlanner::new(&config, &table);

        let tasks = tokio_test::block_on(planner.plan(&[], None)).unwrap();
        let third_party = tasks
            .iter()
            .find(|t| t.package == "third_party/lib")
            .unwrap();
        assert!(third_party.fully_excluded());
        assert_eq!(third_party.excluded, vec![WHOLE_PACKAGE]);
    }

    #[test]
    fn case_enumeration_partitions_tests() {
        let config = config(
            r#"case_list_command = "sh -c 'echo TestOne; echo TestTwo; echo TestSlow' {package}""#,
        );
        let table =
            ExclusionTable::compile(&[rule("alpha", "TestSlow")], Platform::current()).unwrap();
        let planner = RunPlanner::new(&config, &table);

        let tasks = tokio_test::block_on(planner.plan(&[], None)).unwrap();
        let alpha = tasks.iter().find(|t| t.package == "alpha").unwrap();
        assert_eq!(alpha.tests, vec!["TestOne", "TestTwo"]);
        assert_eq!(alpha.excluded, vec!["TestSlow"]);

        // Packages with no matching exclusions run their full suite.
        let beta = tasks.iter().find(|t| t.package == "beta").unwrap();
        assert!(beta.tests.is_empty());
        assert!(beta.excluded.is_empty());
    }

    #[test]
    fn failing_case_list_aborts_planning() {
        let config = config(r#"case_list_command = "sh -c 'exit 3' {package}""#);
        let table =
            ExclusionTable::compile(&[rule("alpha", "TestX")], Platform::current()).unwrap();
        let planner = RunPlanner::new(&config, &table);

        let err = tokio_test::block_on(planner.plan(&[], None)).unwrap_err();
        assert!(matches!(err, PlanError::CaseListFailed { .. }));
    }

    #[test]
    fn shard_restricts_the_plan() {
        let config = config("");
        let table = ExclusionTable::empty(Platform::current());
        let planner = RunPlanner::new(&config, &table);

        let all = tokio_test::block_on(planner.plan(&[], None)).unwrap();
        let mut sharded = Vec::new();
        for part in 0..2 {
            sharded.extend(tokio_test::block_on(planner.plan(&[], Some((part, 2)))).unwrap());
        }
        assert_eq!(sharded.len(), all.len());
    }
}
