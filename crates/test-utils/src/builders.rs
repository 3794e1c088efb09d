#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pmonitor::engine::{MonitorOptions, StepObserver};
use pmonitor::types::ScanMode;

/// Builder for `MonitorOptions` rooted in a scratch directory.
///
/// Report and status go to `<dir>`, trace files to `<dir>/log`. Starts with
/// a single `localhost` of capacity 1 and request `test`.
pub struct MonitorOptionsBuilder {
    options: MonitorOptions,
    default_hosts: bool,
}

impl MonitorOptionsBuilder {
    pub fn new(dir: &Path) -> Self {
        Self {
            options: MonitorOptions {
                request: "test".to_string(),
                hosts: vec![("localhost".to_string(), 1)],
                logdir: dir.join("log"),
                rundir: dir.to_path_buf(),
                ..MonitorOptions::default()
            },
            default_hosts: true,
        }
    }

    pub fn request(mut self, request: &str) -> Self {
        self.options.request = request.to_string();
        self
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.options.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add a host; the first call replaces the default `localhost`.
    pub fn host(mut self, name: &str, capacity: u32) -> Self {
        if self.default_hosts {
            self.options.hosts.clear();
            self.default_hosts = false;
        }
        self.options.hosts.push((name.to_string(), capacity));
        self
    }

    pub fn type_limit(mut self, call: &str, capacity: u32) -> Self {
        self.options.types.push((call.to_string(), capacity));
        self
    }

    pub fn weight(mut self, call: &str, weight: u32) -> Self {
        self.options.weights.push((call.to_string(), weight));
        self
    }

    pub fn cache(mut self, dir: &Path) -> Self {
        self.options.cache = Some(dir.to_path_buf());
        self
    }

    pub fn swd(mut self, dir: &Path) -> Self {
        self.options.swd = Some(dir.to_path_buf());
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.options.script = Some(script.to_string());
        self
    }

    pub fn simulation(mut self, simulation: bool) -> Self {
        self.options.simulation = simulation;
        self
    }

    pub fn scan(mut self, scan: ScanMode) -> Self {
        self.options.scan = scan;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.options.delay = Some(delay);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.options.observer = Some(observer);
        self
    }

    pub fn build(self) -> MonitorOptions {
        self.options
    }
}
