// src/report/mod.rs

//! Durable run state.
//!
//! - [`Report`] is the append-only ledger of successful commands and output
//!   bindings (`<request>.report`). Reading it at startup is what makes a
//!   rerun skip everything that already succeeded.
//! - [`status`] writes the human-readable live snapshot
//!   (`<request>.status`).

pub mod status;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::dag::Binding;

pub use status::{StatusFile, StatusSnapshot};

const OUTPUT_PREFIX: &str = "#output ";

/// Contents of an existing report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContents {
    /// Command lines that succeeded in an earlier run.
    pub commands: HashSet<String>,
    /// `#output` bindings in file order.
    pub bindings: Vec<Binding>,
}

impl ReportContents {
    /// Parse report text. Lines starting with `#output ` are bindings,
    /// every other non-empty line is a command.
    pub fn parse(text: &str) -> Self {
        let mut contents = ReportContents::default();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix(OUTPUT_PREFIX) {
                let mut words = rest.split_whitespace();
                if let Some(name) = words.next() {
                    contents.bindings.push(Binding {
                        name: name.to_string(),
                        paths: words.map(str::to_string).collect(),
                    });
                }
            } else if !line.is_empty() {
                contents.commands.insert(line.to_string());
            }
        }
        contents
    }
}

/// Append-only report ledger.
///
/// Commands read from an earlier run stay in [`Report::contains`]; commands
/// appended during this run are not added to that set, so a command is only
/// ever skipped because of a *previous* run.
#[derive(Debug)]
pub struct Report {
    previous: HashSet<String>,
    writer: Option<BufWriter<File>>,
}

impl Report {
    /// Read the report at `path` if it exists and open it for appending.
    ///
    /// Returns the report and the bindings recorded in it.
    pub fn open(path: impl AsRef<Path>) -> crate::errors::Result<(Self, Vec<Binding>)> {
        let path = path.as_ref();
        let contents = Self::read_existing(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening report {:?} for appending", path))?;

        info!(
            report = %path.display(),
            commands = contents.commands.len(),
            bindings = contents.bindings.len(),
            "report loaded"
        );

        Ok((
            Self {
                previous: contents.commands,
                writer: Some(BufWriter::new(file)),
            },
            contents.bindings,
        ))
    }

    /// Read the report at `path` if it exists but never write to it.
    ///
    /// Used in simulation mode, so a dry run does not mark steps as done.
    pub fn read_only(path: impl AsRef<Path>) -> crate::errors::Result<(Self, Vec<Binding>)> {
        let path = path.as_ref();
        let contents = Self::read_existing(path)?;
        Ok((
            Self {
                previous: contents.commands,
                writer: None,
            },
            contents.bindings,
        ))
    }

    /// A report with no backing file.
    pub fn in_memory(contents: ReportContents) -> (Self, Vec<Binding>) {
        (
            Self {
                previous: contents.commands,
                writer: None,
            },
            contents.bindings,
        )
    }

    fn read_existing(path: &Path) -> crate::errors::Result<ReportContents> {
        if !path.exists() {
            debug!(report = %path.display(), "no previous report");
            return Ok(ReportContents::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading report {:?}", path))?;
        Ok(ReportContents::parse(&text))
    }

    /// Whether `command` succeeded in a previous run.
    pub fn contains(&self, command: &str) -> bool {
        self.previous.contains(command)
    }

    pub fn append_command(&mut self, command: &str) -> crate::errors::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{command}")?;
        }
        Ok(())
    }

    pub fn append_binding(&mut self, binding: &Binding) -> crate::errors::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}{} {}", OUTPUT_PREFIX, binding.name, binding.paths.join(" "))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> crate::errors::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
