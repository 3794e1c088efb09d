// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::Step;
use crate::engine::MonitorOptions;
use crate::exec::LOCALHOST;
use crate::types::{Priority, ScanMode};

/// Top-level workflow file as read from TOML.
///
/// ```toml
/// [monitor]
/// request = "2010-01"
/// inputs = ["/data/l1/a.N1", "/data/l1/b.N1"]
/// hosts = [{ name = "localhost", capacity = 2 }]
///
/// [[step]]
/// call = "bin/l2.sh"
/// inputs = ["/data/l1/a.N1", "/data/l1/b.N1"]
/// outputs = ["l2"]
/// collating = false
/// ```
///
/// Steps are declared to the monitor in file order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub step: Vec<StepConfig>,
}

/// A workflow file that passed validation.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub monitor: MonitorSection,
    pub step: Vec<StepConfig>,
}

impl WorkflowFile {
    /// Construct without validation; see `TryFrom<RawWorkflowFile>`.
    pub(crate) fn new_unchecked(monitor: MonitorSection, step: Vec<StepConfig>) -> Self {
        Self { monitor, step }
    }

    /// Monitor options described by the `[monitor]` section.
    pub fn monitor_options(&self) -> MonitorOptions {
        let m = &self.monitor;
        MonitorOptions {
            inputs: m.inputs.clone(),
            request: m.request.clone(),
            hosts: m.hosts.iter().map(CapacityConfig::pair).collect(),
            types: m.types.iter().map(CapacityConfig::pair).collect(),
            weights: m
                .weights
                .iter()
                .map(|w| (w.name.clone(), w.weight))
                .collect(),
            swd: m.swd.clone(),
            cache: m.cache.clone(),
            logdir: m.logdir.clone(),
            rundir: m.rundir.clone(),
            simulation: m.simulation,
            delay: m.delay_ms.map(Duration::from_millis),
            scan: m.scan,
            script: m.script.clone(),
            observer: None,
        }
    }

    /// The `[[step]]` entries as step declarations, in file order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.step.iter().map(StepConfig::to_step)
    }
}

/// `[monitor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Prefix of `<request>.report` and `<request>.status`.
    #[serde(default)]
    pub request: String,

    /// Seed products.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Default: a single `localhost` with capacity 4.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<CapacityConfig>,

    /// Per-call concurrency limits.
    #[serde(default)]
    pub types: Vec<CapacityConfig>,

    #[serde(default)]
    pub weights: Vec<WeightConfig>,

    #[serde(default)]
    pub swd: Option<PathBuf>,

    #[serde(default)]
    pub cache: Option<PathBuf>,

    #[serde(default = "default_dir")]
    pub logdir: PathBuf,

    #[serde(default = "default_dir")]
    pub rundir: PathBuf,

    #[serde(default)]
    pub simulation: bool,

    /// Minimum milliseconds between two task starts.
    #[serde(default)]
    pub delay_ms: Option<u64>,

    /// `"fair"` (default) or `"exhaustive"`.
    #[serde(default)]
    pub scan: ScanMode,

    #[serde(default)]
    pub script: Option<String>,
}

fn default_hosts() -> Vec<CapacityConfig> {
    vec![CapacityConfig {
        name: LOCALHOST.to_string(),
        capacity: 4,
    }]
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            request: String::new(),
            inputs: Vec::new(),
            hosts: default_hosts(),
            types: Vec::new(),
            weights: Vec::new(),
            swd: None,
            cache: None,
            logdir: default_dir(),
            rundir: default_dir(),
            simulation: false,
            delay_ms: None,
            scan: ScanMode::default(),
            script: None,
        }
    }
}

/// `{ name = "...", capacity = n }` entry of `hosts` or `types`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CapacityConfig {
    pub name: String,
    pub capacity: u32,
}

impl CapacityConfig {
    fn pair(&self) -> (String, u32) {
        (self.name.clone(), self.capacity)
    }
}

/// `{ name = "<call>", weight = n }` entry of `weights`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WeightConfig {
    pub name: String,
    pub weight: u32,
}

/// `[[step]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub call: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub parameters: Vec<String>,

    #[serde(default = "default_priority")]
    pub priority: Priority,

    /// One task for all inputs (default) or one task per input.
    #[serde(default = "default_collating")]
    pub collating: bool,

    #[serde(default)]
    pub log_prefix: Option<String>,
}

fn default_priority() -> Priority {
    1
}

fn default_collating() -> bool {
    true
}

impl StepConfig {
    pub fn to_step(&self) -> Step {
        let step = Step::new(self.call.clone())
            .inputs(self.inputs.iter().cloned())
            .outputs(self.outputs.iter().cloned())
            .parameters(self.parameters.iter().cloned())
            .priority(self.priority)
            .collating(self.collating);
        match &self.log_prefix {
            Some(prefix) => step.with_log_prefix(prefix.clone()),
            None => step,
        }
    }
}
