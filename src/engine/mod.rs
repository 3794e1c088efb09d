// src/engine/mod.rs

//! Scheduling engine for pmonitor.
//!
//! This module ties together:
//! - host and type constraints ([`constraint`])
//! - the priority worker pool ([`pool`])
//! - the scheduler state machine: admission, backlog maturity, skip on
//!   rerun, completion bookkeeping ([`core`])
//! - the async shell that runs tasks and exposes the public API
//!   ([`monitor`])

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::LOCALHOST;
use crate::types::{ScanMode, TaskId};

pub mod constraint;
pub mod core;
pub mod monitor;
pub mod pool;

pub use constraint::{Constraint, ConstraintSet};
pub use core::{CoreConfig, MonitorCore, Start};
pub use monitor::PMonitor;
pub use pool::WorkerPool;

/// A step that finished or was skipped, as handed to a [`StepObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub task_id: TaskId,
    pub call: String,
    /// Input paths the task ran with.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub parameters: Vec<String>,
    pub code: i32,
    /// The command succeeded in an earlier run and was not executed again.
    pub skipped: bool,
}

/// Hook for collecting per-step results, e.g. to accumulate a summary of
/// what a workflow produced.
///
/// Called from the worker that handled the step, after the scheduler state
/// has been updated. Implementations must not block for long.
pub trait StepObserver: Send + Sync {
    fn observe_step(&self, event: &StepEvent);
}

/// Construction options of a [`PMonitor`].
#[derive(Clone)]
pub struct MonitorOptions {
    /// Products that exist before anything runs.
    pub inputs: Vec<String>,
    /// Prefix of the report, status and cache directory names.
    pub request: String,
    /// `(host, capacity)`; one worker per capacity unit.
    pub hosts: Vec<(String, u32)>,
    /// `(call, capacity)`: at most `capacity` concurrent tasks of that call.
    pub types: Vec<(String, u32)>,
    /// `(call, weight)`: host slots a task of that call occupies.
    pub weights: Vec<(String, u32)>,
    /// Software directory prepended to relative calls.
    pub swd: Option<PathBuf>,
    /// Cache root; tasks then run in `<cache>/<request>/<id>`.
    pub cache: Option<PathBuf>,
    /// Directory for trace files.
    pub logdir: PathBuf,
    /// Directory holding `<request>.report` and `<request>.status`.
    pub rundir: PathBuf,
    /// Walk the dependency graph without running anything.
    pub simulation: bool,
    /// Minimum time between two task starts.
    pub delay: Option<Duration>,
    pub scan: ScanMode,
    /// Wrapper script; the call is then passed as its first argument.
    pub script: Option<String>,
    pub observer: Option<Arc<dyn StepObserver>>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            request: String::new(),
            hosts: vec![(LOCALHOST.to_string(), 4)],
            types: Vec::new(),
            weights: Vec::new(),
            swd: None,
            cache: None,
            logdir: PathBuf::from("."),
            rundir: PathBuf::from("."),
            simulation: false,
            delay: None,
            scan: ScanMode::default(),
            script: None,
            observer: None,
        }
    }
}

impl fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("request", &self.request)
            .field("inputs", &self.inputs.len())
            .field("hosts", &self.hosts)
            .field("types", &self.types)
            .field("weights", &self.weights)
            .field("swd", &self.swd)
            .field("cache", &self.cache)
            .field("logdir", &self.logdir)
            .field("rundir", &self.rundir)
            .field("simulation", &self.simulation)
            .field("delay", &self.delay)
            .field("scan", &self.scan)
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

impl MonitorOptions {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Self::default()
        }
    }

    pub(crate) fn core_config(&self) -> CoreConfig {
        CoreConfig {
            inputs: self.inputs.clone(),
            hosts: self.hosts.clone(),
            types: self.types.clone(),
            weights: self.weights.clone(),
            scan: self.scan,
        }
    }
}
