// src/exec/trace.rs

//! Per-task trace file and `output=` line capture.

use std::path::Path;

use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::errors::Result;

/// Prefix of the lines a step uses to report a produced path.
pub const OUTPUT_LINE_PREFIX: &str = "output=";

/// Receives the output lines of a running step.
///
/// Every line goes to the trace file verbatim; lines starting with
/// `output=` are additionally collected as discovered output paths.
#[derive(Debug)]
pub struct TraceSink {
    file: BufWriter<File>,
    discovered: Vec<String>,
    lines: usize,
}

impl TraceSink {
    /// Create (truncate) the trace file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .await
            .with_context(|| format!("creating trace file {:?}", path))?;
        Ok(Self {
            file: BufWriter::new(file),
            discovered: Vec::new(),
            lines: 0,
        })
    }

    /// Handle one line of step output (without its line terminator).
    pub async fn line(&mut self, line: &str) -> Result<()> {
        if let Some(path) = line.strip_prefix(OUTPUT_LINE_PREFIX) {
            self.discovered.push(path.trim().to_string());
        }
        self.lines += 1;
        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await?;
        Ok(())
    }

    pub fn line_count(&self) -> usize {
        self.lines
    }

    /// Paths reported through `output=` lines, in the order they appeared.
    pub fn discovered(&self) -> &[String] {
        &self.discovered
    }

    pub fn into_discovered(self) -> Vec<String> {
        self.discovered
    }
}
