#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub use pmonitor_test_utils::builders::MonitorOptionsBuilder;
pub use pmonitor_test_utils::fake_runner::{FakeRunner, RecordingObserver, Script};
pub use pmonitor_test_utils::{init_tracing, with_timeout};

/// Full text of `<dir>/<request>.status`.
pub fn status_text(dir: &Path, request: &str) -> String {
    fs::read_to_string(dir.join(format!("{request}.status"))).expect("status file")
}

/// First line of `<dir>/<request>.status`.
pub fn status_line(dir: &Path, request: &str) -> String {
    status_text(dir, request)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Full text of `<dir>/<request>.report`, empty if missing.
pub fn report_text(dir: &Path, request: &str) -> String {
    fs::read_to_string(dir.join(format!("{request}.report"))).unwrap_or_default()
}
