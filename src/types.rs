use std::str::FromStr;
use serde::Deserialize;

/// How the backlog is walked after each completion.
///
/// - `Fair`: walk in creation order and stop at the first task whose inputs
///   are available but whose resources are not (default). Later tasks cannot
///   overtake an earlier one that is only waiting for capacity.
/// - `Exhaustive`: walk the whole backlog every time and dispatch everything
///   that fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Fair,
    Exhaustive,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::Fair
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fair" => Ok(ScanMode::Fair),
            "exhaustive" => Ok(ScanMode::Exhaustive),
            other => Err(format!(
                "invalid scan mode: {other} (expected \"fair\" or \"exhaustive\")"
            )),
        }
    }
}

/// Monotonically increasing task identifier, also used for working
/// directory and trace file names.
pub type TaskId = u64;

/// Lower values are processed first.
pub type Priority = i32;
