//! harrier: a parallel package test harness for monorepo CI.
//!
//! This crate drives an external build/test tool across the packages of a
//! large repository: it enumerates packages, applies known-failure
//! exclusion rules, fans one task per package out to a bounded worker
//! pool, classifies each captured result, and emits xUnit and Cobertura
//! reports for the CI host.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **pkg**: package enumeration, pattern matching, shard selection
//! - **exclude**: the known-failure exclusion table (configuration data)
//! - **plan**: resolves patterns and exclusions into concrete tasks
//! - **dispatch**: the worker pool and result collector
//! - **classify**: exit-code heuristics and structured test events
//! - **report**: console, xUnit XML, and Cobertura XML reporters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harrier::config::load_config;
//! use harrier::dispatch::{Dispatcher, Task};
//! use harrier::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("harrier.toml"))?;
//!     let dispatcher = Dispatcher::new(&config)?;
//!     let tasks = vec![Task::new("services/auth")];
//!     let summary = dispatcher.run(tasks, Arc::new(NullReporter)).await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod ci;
pub mod classify;
pub mod config;
pub mod coverage;
pub mod dispatch;
pub mod exclude;
pub mod exec;
pub mod pkg;
pub mod plan;
pub mod report;

// Re-export commonly used types
pub use ci::CiEnv;
pub use config::{Config, load_config};
pub use dispatch::{Dispatcher, RunContext, RunSummary, Task, TaskResult, TaskStatus};
pub use exclude::{ExclusionTable, Platform};
pub use pkg::{PackageLister, PackagePattern};
pub use plan::RunPlanner;
pub use report::Reporter;
