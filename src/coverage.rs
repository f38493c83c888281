//! Coverage profile parsing and aggregation.
//!
//! Tools write line-oriented coverage profiles: a `mode:` header followed
//! by one block per statement range,
//!
//! ```text
//! mode: count
//! services/auth/token.go:12.2,15.9 3 7
//! ```
//!
//! meaning lines 12-15 of that file hold 3 statements that executed 7
//! times. This module parses profiles into per-file line-hit tables, ready
//! for conversion into a coverage report.

use std::collections::BTreeMap;
use std::path::Path;

/// Result type for coverage operations.
pub type CoverageResult<T> = Result<T, CoverageError>;

/// Errors raised while reading a coverage profile.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed profile line {line}: `{text}`")]
    Parse { line: usize, text: String },
}

/// Line-hit table for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCoverage {
    /// Line number to execution count.
    pub lines: BTreeMap<u32, u64>,
}

impl FileCoverage {
    /// Number of lines with at least one hit.
    pub fn lines_covered(&self) -> u64 {
        self.lines.values().filter(|hits| **hits > 0).count() as u64
    }

    /// Number of tracked lines.
    pub fn lines_valid(&self) -> u64 {
        self.lines.len() as u64
    }

    /// Fraction of tracked lines with at least one hit.
    pub fn line_rate(&self) -> f64 {
        if self.lines.is_empty() {
            0.0
        } else {
            self.lines_covered() as f64 / self.lines_valid() as f64
        }
    }
}

/// A parsed coverage profile: per-file line-hit tables.
#[derive(Debug, Clone, Default)]
pub struct CoverageProfile {
    /// The profile's `mode:` header value, if present.
    pub mode: Option<String>,

    /// File path to its coverage, ordered for stable report output.
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageProfile {
    /// Read and parse a profile file.
    pub fn load(path: &Path) -> CoverageResult<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Parse profile text.
    ///
    /// Hit counts of overlapping ranges add, which also makes merging
    /// profiles from sharded runs a plain concatenation.
    pub fn parse(text: &str) -> CoverageResult<Self> {
        let mut profile = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(mode) = line.strip_prefix("mode:") {
                profile.mode.get_or_insert_with(|| mode.trim().to_string());
                continue;
            }

            let block = parse_block(line).ok_or_else(|| CoverageError::Parse {
                line: index + 1,
                text: raw.to_string(),
            })?;

            let file = profile.files.entry(block.file).or_default();
            for number in block.start_line..=block.end_line {
                *file.lines.entry(number).or_insert(0) += block.hits;
            }
        }

        Ok(profile)
    }

    /// Merge another profile into this one; hit counts add.
    pub fn merge(&mut self, other: CoverageProfile) {
        if self.mode.is_none() {
            self.mode = other.mode;
        }
        for (path, coverage) in other.files {
            let file = self.files.entry(path).or_default();
            for (number, hits) in coverage.lines {
                *file.lines.entry(number).or_insert(0) += hits;
            }
        }
    }

    /// Total lines with at least one hit.
    pub fn lines_covered(&self) -> u64 {
        self.files.values().map(FileCoverage::lines_covered).sum()
    }

    /// Total tracked lines.
    pub fn lines_valid(&self) -> u64 {
        self.files.values().map(FileCoverage::lines_valid).sum()
    }

    /// Overall fraction of tracked lines with at least one hit.
    pub fn line_rate(&self) -> f64 {
        let valid = self.lines_valid();
        if valid == 0 {
            0.0
        } else {
            self.lines_covered() as f64 / valid as f64
        }
    }

    /// Group files by their package (directory) path.
    pub fn by_package(&self) -> BTreeMap<String, Vec<(&str, &FileCoverage)>> {
        let mut packages: BTreeMap<String, Vec<(&str, &FileCoverage)>> = BTreeMap::new();
        for (path, coverage) in &self.files {
            let package = match path.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => ".".to_string(),
            };
            packages
                .entry(package)
                .or_default()
                .push((path.as_str(), coverage));
        }
        packages
    }
}

struct Block {
    file: String,
    start_line: u32,
    end_line: u32,
    hits: u64,
}

/// Parse one `file:SL.SC,EL.EC stmts hits` block.
fn parse_block(line: &str) -> Option<Block> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let _statements: u64 = fields.next()?.parse().ok()?;
    let hits: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }

    // The file path may itself contain colons; the range starts after the
    // last one.
    let (file, positions) = range.rsplit_once(':')?;
    let (start, end) = positions.split_once(',')?;
    let start_line = position_line(start)?;
    let end_line = position_line(end)?;
    if file.is_empty() || end_line < start_line {
        return None;
    }

    Some(Block {
        file: file.to_string(),
        start_line,
        end_line,
        hits,
    })
}

/// The line part of a `line.column` position.
fn position_line(position: &str) -> Option<u32> {
    let (line, _column) = position.split_once('.')?;
    line.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\
mode: count
services/auth/token.go:10.2,12.9 2 5
services/auth/token.go:14.2,14.30 1 0
services/auth/store.go:3.1,4.1 1 1
cmd/main.go:8.1,9.2 2 3
";

    #[test]
    fn parses_files_and_line_hits() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        assert_eq!(profile.mode.as_deref(), Some("count"));
        assert_eq!(profile.files.len(), 3);

        let token = &profile.files["services/auth/token.go"];
        assert_eq!(token.lines[&10], 5);
        assert_eq!(token.lines[&11], 5);
        assert_eq!(token.lines[&12], 5);
        assert_eq!(token.lines[&14], 0);
        assert_eq!(token.lines_valid(), 4);
        assert_eq!(token.lines_covered(), 3);
    }

    #[test]
    fn computes_overall_rates() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        // token.go: 3/4 covered, store.go: 2/2, main.go: 2/2.
        assert_eq!(profile.lines_valid(), 8);
        assert_eq!(profile.lines_covered(), 7);
        assert!((profile.line_rate() - 7.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn empty_profile_has_zero_rate() {
        let profile = CoverageProfile::parse("mode: set\n").unwrap();
        assert_eq!(profile.line_rate(), 0.0);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = CoverageProfile::parse("mode: set\ngarbage here\n").unwrap_err();
        match err {
            CoverageError::Parse { line, text } => {
                assert_eq!(line, 2);
                assert!(text.contains("garbage"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn merge_adds_hit_counts() {
        let mut a = CoverageProfile::parse("mode: count\na/f.go:1.1,2.1 1 1\n").unwrap();
        let b = CoverageProfile::parse("mode: count\na/f.go:2.1,3.1 1 4\nb/g.go:1.1,1.9 1 0\n")
            .unwrap();
        a.merge(b);

        let f = &a.files["a/f.go"];
        assert_eq!(f.lines[&1], 1);
        assert_eq!(f.lines[&2], 5);
        assert_eq!(f.lines[&3], 4);
        assert_eq!(a.files["b/g.go"].lines_covered(), 0);
    }

    #[test]
    fn groups_files_by_package() {
        let profile = CoverageProfile::parse(PROFILE).unwrap();
        let packages = profile.by_package();
        assert_eq!(
            packages.keys().collect::<Vec<_>>(),
            vec!["cmd", "services/auth"]
        );
        assert_eq!(packages["services/auth"].len(), 2);
    }

    #[test]
    fn windows_style_paths_keep_their_colon() {
        let profile = CoverageProfile::parse("C:/repo/pkg/f.go:1.1,1.5 1 2\n").unwrap();
        assert!(profile.files.contains_key("C:/repo/pkg/f.go"));
    }
}
