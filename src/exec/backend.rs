// src/exec/backend.rs

//! Pluggable step runner abstraction.
//!
//! The scheduler talks to a `StepRunner` instead of spawning processes
//! itself. This makes it easy to swap in a fake runner in tests while keeping
//! the production implementation in [`process`](super::process).
//!
//! - [`ProcessRunner`](super::ProcessRunner) is the default implementation
//!   used by `pmonitor`. It runs the command with `sh -c` locally, or through
//!   `ssh` on any other host.
//! - Tests can provide their own `StepRunner` that, for example, records the
//!   invocations and feeds scripted `output=` lines into the sink.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;
use crate::exec::trace::TraceSink;
use crate::types::TaskId;

/// Host name that is run without `ssh`.
pub const LOCALHOST: &str = "localhost";

/// Everything a runner needs to launch one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task_id: TaskId,
    pub call: String,
    pub host: String,
    pub command: String,
    pub workdir: PathBuf,
}

impl Invocation {
    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }
}

/// Trait abstracting how a command line is run on a named host.
pub trait StepRunner: Send + Sync {
    /// Run the invocation to completion.
    ///
    /// Every line of combined stdout/stderr must be handed to `sink` in the
    /// order it was produced. Returns the exit code; `Err` means the command
    /// could not be run at all.
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a mut TraceSink,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>>;
}
