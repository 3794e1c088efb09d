// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the command lines the
//! scheduler builds, and for handing their output back line by line.
//!
//! - [`backend`] provides the `StepRunner` trait the scheduler depends on.
//! - [`process`] is the production runner (`sh -c` locally, `ssh` remotely).
//! - [`trace`] writes per-task trace files and captures `output=` lines.

pub mod backend;
pub mod process;
pub mod trace;

pub use backend::{Invocation, StepRunner, LOCALHOST};
pub use process::ProcessRunner;
pub use trace::{TraceSink, OUTPUT_LINE_PREFIX};
