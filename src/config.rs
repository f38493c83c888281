//! Configuration loading for harrier.
//!
//! Configuration comes from a TOML file (`harrier.toml` by default). The
//! schema lives in [`schema`]; this module handles reading, parsing, path
//! expansion, and validation.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Loads harrier configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// does not match the configuration schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(expand_paths(config))
}

/// Loads harrier configuration from a TOML string.
///
/// Useful for testing and for generating configuration programmatically.
///
/// # Example
///
/// ```
/// use harrier::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [harrier]
///     workers = 4
///
///     [tool]
///     list_command = "go list ./..."
///     run_command = "go test -json {package}"
/// "#)?;
///
/// assert_eq!(config.harrier.workers, 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("failed to parse config")?;
    Ok(expand_paths(config))
}

/// Check invariants that the schema alone cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.harrier.workers == 0 {
        bail!("[harrier] workers must be at least 1");
    }
    if config.tool.list_command.trim().is_empty() {
        bail!("[tool] list_command must not be empty");
    }
    if config.tool.run_command.trim().is_empty() {
        bail!("[tool] run_command must not be empty");
    }
    if !config.tool.run_command.contains("{package}") {
        bail!("[tool] run_command must contain the {{package}} placeholder");
    }
    if let Some(case_list) = &config.tool.case_list_command
        && !case_list.contains("{package}")
    {
        bail!("[tool] case_list_command must contain the {{package}} placeholder");
    }
    if config.report.cobertura && config.report.coverage_profile.is_none() {
        bail!("[report] cobertura requires coverage_profile to be set");
    }
    Ok(())
}

/// Expand `~` in user-supplied paths.
fn expand_paths(mut config: Config) -> Config {
    config.harrier.working_dir = config.harrier.working_dir.map(expand_tilde);
    config.report.coverage_profile = config.report.coverage_profile.map(expand_tilde);
    config
}

fn expand_tilde(path: PathBuf) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
