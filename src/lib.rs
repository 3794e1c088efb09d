// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod report;
pub mod types;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::WorkflowFile;
use crate::engine::PMonitor;

pub use crate::dag::Step;
pub use crate::engine::{MonitorOptions, StepEvent, StepObserver};
pub use crate::errors::PMonitorError;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow file loading and validation
/// - CLI overrides of the `[monitor]` section
/// - the monitor with the process runner
///
/// Returns the exit code of the workflow: 0 if every step succeeded or was
/// skipped, 1 if a step failed or could not run.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(0);
    }

    let mut options = cfg.monitor_options();
    if let Some(request) = args.request {
        options.request = request;
    }
    if args.simulate {
        options.simulation = true;
    }

    info!(config = %args.config, steps = cfg.step.len(), "loaded workflow");

    let monitor = PMonitor::with_process_runner(options)?;
    for step in cfg.steps() {
        monitor.execute(step)?;
    }
    let code = monitor.finish().await?;
    Ok(code)
}

/// Simple dry-run output: print monitor settings and steps.
fn print_dry_run(cfg: &WorkflowFile) {
    let m = &cfg.monitor;
    println!("pmonitor dry-run");
    println!("  monitor.request = {:?}", m.request);
    println!("  monitor.inputs = {}", m.inputs.len());
    for host in &m.hosts {
        println!("  monitor.host {} x{}", host.name, host.capacity);
    }
    for ty in &m.types {
        println!("  monitor.type {} x{}", ty.name, ty.capacity);
    }
    for weight in &m.weights {
        println!("  monitor.weight {} = {}", weight.name, weight.weight);
    }
    println!("  monitor.scan = {:?}", m.scan);
    println!();

    println!("steps ({}):", cfg.step.len());
    for step in &cfg.step {
        println!("  - {}", step.call);
        if !step.inputs.is_empty() {
            println!("      inputs: {:?}", step.inputs);
        }
        if !step.outputs.is_empty() {
            println!("      outputs: {:?}", step.outputs);
        }
        if !step.parameters.is_empty() {
            println!("      parameters: {:?}", step.parameters);
        }
        if step.priority != 1 {
            println!("      priority: {}", step.priority);
        }
        if !step.collating {
            println!("      collating: false");
        }
        if let Some(ref prefix) = step.log_prefix {
            println!("      log_prefix: {prefix}");
        }
    }

    debug!("dry-run complete (no execution)");
}
