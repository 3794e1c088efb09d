// src/config/mod.rs

//! Workflow file loading and validation for pmonitor.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate basic invariants like product graph correctness
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    CapacityConfig, MonitorSection, RawWorkflowFile, StepConfig, WeightConfig, WorkflowFile,
};
pub use validate::validate_workflow;
