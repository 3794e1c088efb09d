// src/report/status.rs

//! Live status snapshot file.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::errors::Result;

/// Point-in-time view of the scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub created: u64,
    pub processed: u64,
    /// Commands currently running.
    pub running: Vec<String>,
    /// Commands that failed.
    pub failed: Vec<String>,
    /// Number of backlogged tasks.
    pub backlog: usize,
    /// `b ...` lines, only filled in for the final snapshot.
    pub backlog_lines: Vec<String>,
}

impl StatusSnapshot {
    /// The first line of the status file, e.g.
    /// `"3 created, 0 running, 0 backlog, 3 processed, 0 failed"`.
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} running, {} backlog, {} processed, {} failed",
            self.created,
            self.running.len(),
            self.backlog,
            self.processed,
            self.failed.len()
        )
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for command in &self.failed {
            writeln!(f, "f {command}")?;
        }
        for command in &self.running {
            writeln!(f, "r {command}")?;
        }
        for line in &self.backlog_lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// `<request>.status`, rewritten on every change.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<()> {
        fs::write(&self.path, snapshot.to_string())
            .with_context(|| format!("writing status file {:?}", self.path))?;
        Ok(())
    }
}
