//! Package enumeration, pattern matching, and shard selection.
//!
//! Packages are slash-separated paths produced by the configured list
//! command, one per line. Patterns use the conventional monorepo syntax:
//! `foo/...` matches `foo` and everything under it, `*` matches within a
//! single path segment, and a bare `...` matches every package.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::{Config, ToolConfig};
use crate::exec::{self, Command, ExecError};

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Errors raised while enumerating packages.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("invalid package pattern `{pattern}`: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid list command `{command}`: {source}")]
    CommandParse {
        command: String,
        source: shell_words::ParseError,
    },

    #[error("list command is empty")]
    EmptyCommand,

    #[error("list command exited with code {exit_code}: {stderr}")]
    ListFailed { exit_code: i32, stderr: String },

    #[error("shard {part} out of range for {parts} parts")]
    BadShard { part: usize, parts: usize },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A glob-ish pattern over package paths.
#[derive(Debug, Clone)]
pub struct PackagePattern {
    raw: String,
    regex: Regex,
}

impl PackagePattern {
    /// Parse a pattern. `...` as a trailing segment matches any suffix;
    /// `*` matches within a segment.
    pub fn parse(pattern: &str) -> PackageResult<Self> {
        let regex = Regex::new(&pattern_to_regex(pattern)).map_err(|source| {
            PackageError::BadPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Parse a list of patterns, stopping at the first bad one.
    pub fn parse_all(patterns: &[String]) -> PackageResult<Vec<Self>> {
        patterns.iter().map(|p| Self::parse(p)).collect()
    }

    pub fn matches(&self, package: &str) -> bool {
        self.regex.is_match(package)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn pattern_to_regex(pattern: &str) -> String {
    if pattern == "..." {
        return "^.*$".to_string();
    }

    let (prefix, any_suffix) = match pattern.strip_suffix("/...") {
        Some(prefix) => (prefix, true),
        None => (pattern, false),
    };

    // `*` stays within one segment; everything else is literal.
    let body: String = prefix
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^/]*");

    if any_suffix {
        format!("^{body}(/.*)?$")
    } else {
        format!("^{body}$")
    }
}

/// Enumerates packages by running the configured list command.
pub struct PackageLister {
    list_command: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl PackageLister {
    pub fn new(tool: &ToolConfig, working_dir: Option<PathBuf>) -> Self {
        Self {
            list_command: tool.list_command.clone(),
            working_dir,
            env: tool.env.clone(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.tool, config.harrier.working_dir.clone())
    }

    /// Run the list command and keep the packages matching `patterns`.
    ///
    /// An empty pattern list keeps everything. Output lines are trimmed;
    /// blank lines and `#` comments are ignored. The result is sorted and
    /// deduplicated. A failing list command is an init-phase error.
    pub async fn list(&self, patterns: &[PackagePattern]) -> PackageResult<Vec<String>> {
        let argv = shell_words::split(&self.list_command).map_err(|source| {
            PackageError::CommandParse {
                command: self.list_command.clone(),
                source,
            }
        })?;
        let mut cmd = Command::from_argv(&argv).ok_or(PackageError::EmptyCommand)?;
        if let Some(dir) = &self.working_dir {
            cmd = cmd.working_dir(dir.clone());
        }
        for (key, value) in &self.env {
            cmd = cmd.env(key.clone(), value.clone());
        }

        let output = exec::run(&cmd).await?;
        if !output.success() {
            return Err(PackageError::ListFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let mut packages: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter(|line| patterns.is_empty() || patterns.iter().any(|p| p.matches(line)))
            .map(str::to_string)
            .collect();

        packages.sort();
        packages.dedup();
        Ok(packages)
    }
}

/// Keep the packages assigned to shard `part` of `parts`.
///
/// Assignment hashes the package name, so it is deterministic across runs
/// and machines, and the shards of one package set are disjoint with the
/// full set as their union.
pub fn select_shard(packages: &[String], part: usize, parts: usize) -> PackageResult<Vec<String>> {
    if parts == 0 || part >= parts {
        return Err(PackageError::BadShard { part, parts });
    }
    Ok(packages
        .iter()
        .filter(|package| shard_of(package, parts) == part)
        .cloned()
        .collect())
}

/// The shard a package belongs to, out of `parts`.
pub fn shard_of(package: &str, parts: usize) -> usize {
    let digest = Sha256::digest(package.as_bytes());
    let value = digest[..8]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    (value % parts as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ellipsis_matches_everything() {
        let p = PackagePattern::parse("...").unwrap();
        assert!(p.matches("a"));
        assert!(p.matches("a/b/c"));
    }

    #[test]
    fn trailing_ellipsis_matches_prefix_and_subpackages() {
        let p = PackagePattern::parse("services/auth/...").unwrap();
        assert!(p.matches("services/auth"));
        assert!(p.matches("services/auth/token"));
        assert!(!p.matches("services/authz"));
        assert!(!p.matches("services"));
    }

    #[test]
    fn star_stays_within_a_segment() {
        let p = PackagePattern::parse("lib/*/testdata").unwrap();
        assert!(p.matches("lib/io/testdata"));
        assert!(!p.matches("lib/io/nested/testdata"));
    }

    #[test]
    fn literal_pattern_is_exact() {
        let p = PackagePattern::parse("tools.v2/cmd").unwrap();
        assert!(p.matches("tools.v2/cmd"));
        // The dot is literal, not a regex wildcard.
        assert!(!p.matches("toolsXv2/cmd"));
    }

    #[tokio::test]
    async fn lister_filters_sorts_and_dedups() {
        let tool = ToolConfig {
            list_command: r#"printf 'b/x\n# comment\na/y\nb/x\n\nc/z\n'"#.to_string(),
            ..ToolConfig::default()
        };
        let lister = PackageLister::new(&tool, None);

        let all = lister.list(&[]).await.unwrap();
        assert_eq!(all, vec!["a/y", "b/x", "c/z"]);

        let patterns = PackagePattern::parse_all(&["b/...".to_string()]).unwrap();
        let only_b = lister.list(&patterns).await.unwrap();
        assert_eq!(only_b, vec!["b/x"]);
    }

    #[tokio::test]
    async fn failing_list_command_is_an_error() {
        let tool = ToolConfig {
            list_command: "sh -c 'echo nope >&2; exit 9'".to_string(),
            ..ToolConfig::default()
        };
        let err = PackageLister::new(&tool, None).list(&[]).await.unwrap_err();
        match err {
            PackageError::ListFailed { exit_code, stderr } => {
                assert_eq!(exit_code, 9);
                assert!(stderr.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shards_partition_the_package_set() {
        let packages: Vec<String> = (0..40).map(|i| format!("pkg/mod{i}")).collect();
        let parts = 4;

        let shards: Vec<Vec<String>> = (0..parts)
            .map(|part| select_shard(&packages, part, parts).unwrap())
            .collect();

        let mut combined: Vec<String> = shards.iter().flatten().cloned().collect();
        combined.sort();
        let mut expected = packages.clone();
        expected.sort();
        assert_eq!(combined, expected);

        // Deterministic across calls.
        assert_eq!(shards[0], select_shard(&packages, 0, parts).unwrap());
    }

    #[test]
    fn shard_bounds_are_checked() {
        let packages = vec!["a".to_string()];
        assert!(select_shard(&packages, 2, 2).is_err());
        assert!(select_shard(&packages, 0, 0).is_err());
    }
}
