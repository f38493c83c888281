//! CI environment snapshot.
//!
//! CI hosts parameterize the harness through environment variables. The
//! whole set is read once at startup into a [`CiEnv`] value that travels by
//! reference; nothing re-reads the ambient environment after that.

use std::path::PathBuf;

use serde::Serialize;

use crate::exclude::Platform;

/// Environment variables consumed from the CI host, parsed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CiEnv {
    /// `WORKSPACE`: the checkout the CI job runs in.
    pub workspace: Option<PathBuf>,

    /// `BUILD_NUMBER`: the CI build counter, when parseable.
    pub build_number: Option<u64>,

    /// `REFS`: refs under test, comma or whitespace separated.
    pub refs: Vec<String>,

    /// `PROJECTS`: projects changed by the refs under test.
    pub projects: Vec<String>,

    /// `TEST`: explicit package patterns, overriding project mapping.
    pub test_filter: Option<String>,

    /// `HARRIER_ROOT`: the monorepo root, when not the current directory.
    pub root: Option<PathBuf>,

    /// `GOOS`: target operating system override for exclusion predicates.
    pub os_override: Option<String>,

    /// `GOARCH`: target architecture override for exclusion predicates.
    pub arch_override: Option<String>,
}

impl CiEnv {
    /// Snapshot the current process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a snapshot from an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let nonempty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            workspace: nonempty("WORKSPACE").map(PathBuf::from),
            build_number: nonempty("BUILD_NUMBER").and_then(|v| v.trim().parse().ok()),
            refs: nonempty("REFS").map(split_list).unwrap_or_default(),
            projects: nonempty("PROJECTS").map(split_list).unwrap_or_default(),
            test_filter: nonempty("TEST"),
            root: nonempty("HARRIER_ROOT").map(PathBuf::from),
            os_override: nonempty("GOOS"),
            arch_override: nonempty("GOARCH"),
        }
    }

    /// The package patterns a CI-triggered run should use.
    ///
    /// An explicit `TEST` filter wins; otherwise each changed project maps
    /// to `project/...`; with neither, everything runs.
    pub fn run_patterns(&self) -> Vec<String> {
        if let Some(filter) = &self.test_filter {
            return split_list(filter.clone());
        }
        if !self.projects.is_empty() {
            return self
                .projects
                .iter()
                .map(|project| format!("{}/...", project.trim_end_matches('/')))
                .collect();
        }
        vec!["...".to_string()]
    }

    /// The platform exclusion predicates evaluate against, honoring
    /// target overrides from the environment.
    pub fn platform(&self) -> Platform {
        let current = Platform::current();
        Platform::new(
            self.os_override.clone().unwrap_or(current.os),
            self.arch_override.clone().unwrap_or(current.arch),
        )
    }
}

/// Split a list value on commas and whitespace.
fn split_list(value: String) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> CiEnv {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CiEnv::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn parses_the_ci_variables() {
        let env = env_of(&[
            ("WORKSPACE", "/ci/workspace"),
            ("BUILD_NUMBER", "1042"),
            ("REFS", "refs/changes/11/1/2,refs/changes/12/9/1"),
            ("PROJECTS", "auth storage"),
        ]);
        assert_eq!(env.workspace, Some(PathBuf::from("/ci/workspace")));
        assert_eq!(env.build_number, Some(1042));
        assert_eq!(env.refs.len(), 2);
        assert_eq!(env.projects, vec!["auth", "storage"]);
    }

    #[test]
    fn empty_values_count_as_unset() {
        let env = env_of(&[("BUILD_NUMBER", ""), ("TEST", "  ")]);
        assert_eq!(env.build_number, None);
        assert_eq!(env.test_filter, None);
    }

    #[test]
    fn test_filter_beats_projects() {
        let env = env_of(&[("TEST", "net/... storage/kv"), ("PROJECTS", "auth")]);
        assert_eq!(env.run_patterns(), vec!["net/...", "storage/kv"]);
    }

    #[test]
    fn projects_map_to_recursive_patterns() {
        let env = env_of(&[("PROJECTS", "auth,storage/")]);
        assert_eq!(env.run_patterns(), vec!["auth/...", "storage/..."]);
    }

    #[test]
    fn default_pattern_is_everything() {
        assert_eq!(env_of(&[]).run_patterns(), vec!["..."]);
    }

    #[test]
    fn platform_overrides_apply() {
        let env = env_of(&[("GOOS", "plan9"), ("GOARCH", "riscv64")]);
        let platform = env.platform();
        assert_eq!(platform.os, "plan9");
        assert_eq!(platform.arch, "riscv64");

        let native = env_of(&[]).platform();
        assert_eq!(native, Platform::current());
    }
}
