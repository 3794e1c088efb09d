// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `pmonitor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pmonitor",
    version,
    about = "Run a workflow of processing steps across hosts, honouring data dependencies.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `Workflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Workflow.toml")]
    pub config: String,

    /// Override `[monitor].request`.
    #[arg(long, value_name = "NAME")]
    pub request: Option<String>,

    /// Walk the dependency graph without running any step.
    #[arg(long)]
    pub simulate: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PMONITOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the steps, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
