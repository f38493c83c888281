//! harrier CLI - parallel package test harness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use harrier::ci::CiEnv;
use harrier::config::{self, Config};
use harrier::dispatch::Dispatcher;
use harrier::exclude::ExclusionTable;
use harrier::pkg::{PackageLister, PackagePattern};
use harrier::plan::RunPlanner;
use harrier::report::{
    CoberturaReporter, ConsoleReporter, MultiReporter, Reporter, XUnitReporter,
};

#[derive(Parser)]
#[command(name = "harrier")]
#[command(about = "Parallel package test harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "harrier.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests for the matched packages
    Run {
        /// Package patterns (defaults to the CI environment's plan)
        patterns: Vec<String>,

        /// Override the worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the per-package timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Override the report output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Shard index to run, 0-based
        #[arg(long, requires = "parts")]
        part: Option<usize>,

        /// Total number of shards
        #[arg(long, requires = "part")]
        parts: Option<usize>,

        /// xUnit XML output path override
        #[arg(long)]
        xunit: Option<PathBuf>,

        /// Echo tool output line by line as it arrives
        #[arg(long)]
        stream: bool,
    },

    /// List the packages the patterns match
    List {
        /// Package patterns (defaults to every package)
        patterns: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the run plan derived from the CI environment
    Poll {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the configuration file
    Validate,

    /// Write a starter configuration file
    Init {
        /// Tool template (go, generic)
        #[arg(short, long, default_value = "go")]
        tool: String,
    },
}

/// CLI overrides applied on top of the configuration file.
struct RunOptions {
    patterns: Vec<String>,
    workers: Option<usize>,
    timeout: Option<u64>,
    output_dir: Option<PathBuf>,
    shard: Option<(usize, usize)>,
    xunit: Option<PathBuf>,
    stream: bool,
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            patterns,
            workers,
            timeout,
            output_dir,
            part,
            parts,
            xunit,
            stream,
        } => {
            let options = RunOptions {
                patterns,
                workers,
                timeout,
                output_dir,
                shard: part.zip(parts),
                xunit,
                stream,
                verbose: cli.verbose,
            };
            run_tests(&cli.config, options).await
        }
        Commands::List { patterns, format } => list_packages(&cli.config, patterns, &format).await,
        Commands::Poll { format } => poll_plan(&format),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { tool } => init_config(&tool),
    }
}

async fn run_tests(config_path: &Path, options: RunOptions) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(workers) = options.workers {
        config.harrier.workers = workers;
    }
    if let Some(timeout) = options.timeout {
        config.harrier.timeout_secs = timeout;
    }
    if let Some(output_dir) = options.output_dir {
        config.report.output_dir = output_dir;
    }
    if options.stream {
        config.harrier.stream_output = true;
    }
    config::validate(&config)?;

    info!("loaded configuration from {}", config_path.display());

    let ci = CiEnv::from_env();
    let table = ExclusionTable::compile(&config.exclusions, ci.platform())
        .context("failed to compile exclusion rules")?;

    let raw_patterns = if options.patterns.is_empty() {
        ci.run_patterns()
    } else {
        options.patterns.clone()
    };
    let patterns = PackagePattern::parse_all(&raw_patterns)?;
    info!(
        "running patterns: {}",
        raw_patterns.join(" ")
    );

    let planner = RunPlanner::new(&config, &table);
    let tasks = planner
        .plan(&patterns, options.shard)
        .await
        .context("failed to plan the run")?;

    if tasks.is_empty() {
        println!("No packages matched.");
        return Ok(());
    }

    // Clear the output directory to avoid stale reports.
    let output_dir = &config.report.output_dir;
    if output_dir.exists() {
        std::fs::remove_dir_all(output_dir).ok();
    }
    std::fs::create_dir_all(output_dir).ok();

    let reporter: Arc<dyn Reporter> =
        Arc::new(create_reporter(&config, options.xunit, options.verbose));
    reporter.on_plan_complete(&tasks).await;

    let dispatcher = Dispatcher::new(&config)?;
    let summary = dispatcher.run(tasks, reporter).await?;

    std::process::exit(summary.exit_code());
}

async fn list_packages(config_path: &Path, patterns: Vec<String>, format: &str) -> Result<()> {
    let config = config::load_config(config_path)?;
    let ci = CiEnv::from_env();
    let table = ExclusionTable::compile(&config.exclusions, ci.platform())?;

    let patterns = PackagePattern::parse_all(&patterns)?;
    let lister = PackageLister::from_config(&config);
    let packages = lister.list(&patterns).await?;

    match format {
        "json" => {
            #[derive(serde::Serialize)]
            struct Entry<'a> {
                package: &'a str,
                excluded: bool,
            }
            let entries: Vec<Entry> = packages
                .iter()
                .map(|package| Entry {
                    package,
                    excluded: table.excludes_package(package),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            for package in &packages {
                if table.excludes_package(package) {
                    println!("{package} (excluded)");
                } else {
                    println!("{package}");
                }
            }
        }
    }

    Ok(())
}

fn poll_plan(format: &str) -> Result<()> {
    let ci = CiEnv::from_env();
    let patterns = ci.run_patterns();

    match format {
        "json" => {
            #[derive(serde::Serialize)]
            struct Plan {
                env: CiEnv,
                patterns: Vec<String>,
            }
            println!("{}", serde_json::to_string_pretty(&Plan { env: ci, patterns })?);
        }
        _ => {
            match ci.build_number {
                Some(number) => println!("Build:    #{number}"),
                None => println!("Build:    (not a CI build)"),
            }
            if let Some(workspace) = &ci.workspace {
                println!("Workspace: {}", workspace.display());
            }
            if !ci.refs.is_empty() {
                println!("Refs:     {}", ci.refs.join(", "));
            }
            if !ci.projects.is_empty() {
                println!("Projects: {}", ci.projects.join(", "));
            }
            println!("Patterns: {}", patterns.join(" "));
        }
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let loaded = config::load_config(config_path)
        .and_then(|config| config::validate(&config).map(|()| config));

    match loaded {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Workers:      {}", config.harrier.workers);
            println!("  Timeout:      {}s", config.harrier.timeout_secs);
            println!("  Exclusions:   {}", config.exclusions.len());
            println!("  List command: {}", config.tool.list_command);
            println!("  Run command:  {}", config.tool.run_command);
            println!("  JSON events:  {}", config.tool.json_events);
            println!("  Output dir:   {}", config.report.output_dir.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_config(tool: &str) -> Result<()> {
    let tool_config = match tool {
        "go" => {
            r#"[tool]
list_command = "go list ./..."
# Enumerate test names so exclusions can apply per test:
# case_list_command = "go test {package} -list '.*'"
run_command = "go test -json {package}"
json_events = true"#
        }
        "generic" => {
            r#"[tool]
# Any commands work: list_command prints one package per line, and
# {package}/{tests} are substituted into run_command.
list_command = "cat packages.txt"
run_command = "./scripts/run-tests.sh {package} {tests}""#
        }
        _ => {
            eprintln!("Unknown tool template: {tool}. Use: go, generic");
            std::process::exit(1);
        }
    };

    let config = format!(
        r#"# harrier configuration file

[harrier]
# workers defaults to the number of available CPUs
timeout_secs = 900

{tool_config}

# Known-failure exclusions are data, not code. Keep a reason with each.
# [[exclusions]]
# package = "storage/raft"
# test = "TestLeaderElection.*"
# os = "macos"
# reason = "timer resolution too coarse on laptop builders"

[report]
output_dir = "test-results"
xunit = true
xunit_file = "xunit.xml"
"#
    );

    let path = PathBuf::from("harrier.toml");
    if path.exists() {
        eprintln!("harrier.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created harrier.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  harrier run");

    Ok(())
}

fn create_reporter(config: &Config, xunit_override: Option<PathBuf>, verbose: bool) -> MultiReporter {
    let mut multi = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));

    if config.report.xunit {
        let path = xunit_override
            .unwrap_or_else(|| config.report.output_dir.join(&config.report.xunit_file));
        multi = multi.with_reporter(
            XUnitReporter::new(path)
                .with_timeout(Duration::from_secs(config.harrier.timeout_secs)),
        );
    }

    if config.report.cobertura
        && let Some(profile) = &config.report.coverage_profile
    {
        let output = config.report.output_dir.join(&config.report.cobertura_file);
        multi = multi.with_reporter(CoberturaReporter::new(profile.clone(), output));
    }

    multi
}
