//! Known-failure exclusion engine.
//!
//! Exclusion rules are configuration data, not code. Each rule pairs a
//! package regex with a test-name regex and an optional platform predicate
//! ("only on this OS", "only on this CPU architecture"). The table is
//! compiled once at startup and is read-only for the rest of the run, so
//! applying it to the same inputs always yields the same partition.

use regex::Regex;

use crate::config::ExclusionRuleConfig;

/// Result type for exclusion operations.
pub type ExcludeResult<T> = Result<T, ExcludeError>;

/// Errors raised while compiling the exclusion table.
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("invalid exclusion pattern `{pattern}`: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// The platform a run executes on, as seen by exclusion predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// The platform of the current process.
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// A platform with explicit values, for overrides and tests.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

/// A single compiled exclusion rule.
#[derive(Debug)]
pub struct ExclusionRule {
    package: Regex,
    test: Regex,
    os: Option<String>,
    arch: Option<String>,
    reason: Option<String>,
}

impl ExclusionRule {
    /// Compile a rule from package and test-name patterns.
    pub fn new(package: &str, test: &str) -> ExcludeResult<Self> {
        Ok(Self {
            package: compile_anchored(package)?,
            test: compile_anchored(test)?,
            os: None,
            arch: None,
            reason: None,
        })
    }

    /// Restrict the rule to one operating system.
    pub fn on_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    /// Restrict the rule to one CPU architecture.
    pub fn on_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Attach a human-readable reason, carried through to logs.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The reason recorded with the rule, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn applies_on(&self, platform: &Platform) -> bool {
        self.os.as_deref().is_none_or(|os| os == platform.os)
            && self.arch.as_deref().is_none_or(|arch| arch == platform.arch)
    }

    fn matches(&self, package: &str, test: &str) -> bool {
        self.package.is_match(package) && self.test.is_match(test)
    }

    /// A rule whose test pattern is the default match-all applies to the
    /// package as a whole, not to individual test names.
    fn is_package_wide(&self) -> bool {
        let pattern = self.test.as_str();
        pattern == "^(?:.*)$" || pattern == ".*"
    }
}

/// Patterns match whole names, not substrings.
fn compile_anchored(pattern: &str) -> ExcludeResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ExcludeError::BadPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// The compiled, read-only exclusion table for one run.
#[derive(Debug)]
pub struct ExclusionTable {
    rules: Vec<ExclusionRule>,
    platform: Platform,
}

impl ExclusionTable {
    /// Build a table from already-compiled rules.
    pub fn new(rules: Vec<ExclusionRule>, platform: Platform) -> Self {
        Self { rules, platform }
    }

    /// An empty table that excludes nothing.
    pub fn empty(platform: Platform) -> Self {
        Self::new(Vec::new(), platform)
    }

    /// Compile the rules declared in the configuration file.
    pub fn compile(configs: &[ExclusionRuleConfig], platform: Platform) -> ExcludeResult<Self> {
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            let mut rule = ExclusionRule::new(&config.package, &config.test)?;
            if let Some(os) = &config.os {
                rule = rule.on_os(os);
            }
            if let Some(arch) = &config.arch {
                rule = rule.on_arch(arch);
            }
            if let Some(reason) = &config.reason {
                rule = rule.with_reason(reason);
            }
            rules.push(rule);
        }
        Ok(Self::new(rules, platform))
    }

    /// Number of rules in the table (including inactive ones).
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a specific test in a package is excluded on this platform.
    pub fn is_excluded(&self, package: &str, test: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.applies_on(&self.platform) && rule.matches(package, test))
    }

    /// Whether a rule excludes the package as a whole.
    pub fn excludes_package(&self, package: &str) -> bool {
        self.rules.iter().any(|rule| {
            rule.applies_on(&self.platform)
                && rule.is_package_wide()
                && rule.package.is_match(package)
        })
    }

    /// Split a resolved test list into (runnable, excluded).
    pub fn partition(&self, package: &str, tests: &[String]) -> (Vec<String>, Vec<String>) {
        let mut runnable = Vec::new();
        let mut excluded = Vec::new();
        for test in tests {
            if self.is_excluded(package, test) {
                excluded.push(test.clone());
            } else {
                runnable.push(test.clone());
            }
        }
        (runnable, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_amd64() -> Platform {
        Platform::new("linux", "x86_64")
    }

    fn table(rules: Vec<ExclusionRule>) -> ExclusionTable {
        ExclusionTable::new(rules, linux_amd64())
    }

    #[test]
    fn matches_whole_names_only() {
        let rule = ExclusionRule::new("pkg/net", "TestDial").unwrap();
        let t = table(vec![rule]);

        assert!(t.is_excluded("pkg/net", "TestDial"));
        assert!(!t.is_excluded("pkg/net", "TestDialTimeout"));
        assert!(!t.is_excluded("pkg/network", "TestDial"));
    }

    #[test]
    fn platform_predicate_gates_the_rule() {
        let rule = ExclusionRule::new("pkg/.*", "TestFlaky")
            .unwrap()
            .on_os("macos");
        let t = table(vec![rule]);
        assert!(!t.is_excluded("pkg/net", "TestFlaky"));

        let rule = ExclusionRule::new("pkg/.*", "TestFlaky")
            .unwrap()
            .on_os("linux")
            .on_arch("x86_64");
        let t = table(vec![rule]);
        assert!(t.is_excluded("pkg/net", "TestFlaky"));
    }

    #[test]
    fn partition_splits_and_is_idempotent() {
        let rule = ExclusionRule::new("pkg/a", "TestSlow.*").unwrap();
        let t = table(vec![rule]);

        let tests = vec![
            "TestFast".to_string(),
            "TestSlowIo".to_string(),
            "TestSlowNet".to_string(),
        ];
        let (runnable, excluded) = t.partition("pkg/a", &tests);
        assert_eq!(runnable, vec!["TestFast"]);
        assert_eq!(excluded, vec!["TestSlowIo", "TestSlowNet"]);

        let again = t.partition("pkg/a", &tests);
        assert_eq!(again.0, runnable);
        assert_eq!(again.1, excluded);
    }

    #[test]
    fn package_wide_exclusion_uses_default_test_pattern() {
        let config = ExclusionRuleConfig {
            package: "third_party/.*".to_string(),
            test: ".*".to_string(),
            os: None,
            arch: None,
            reason: Some("vendored code is not ours to test".to_string()),
        };
        let t = ExclusionTable::compile(&[config], linux_amd64()).unwrap();

        assert!(t.excludes_package("third_party/leveldb"));
        assert!(!t.excludes_package("storage/leveldb"));
    }

    #[test]
    fn narrow_rule_is_not_package_wide() {
        let rule = ExclusionRule::new("pkg/a", "TestOne").unwrap();
        let t = table(vec![rule]);
        assert!(!t.excludes_package("pkg/a"));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = ExclusionRule::new("pkg/(", ".*").unwrap_err();
        assert!(matches!(err, ExcludeError::BadPattern { .. }));
    }
}
