// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PMonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cycle detected in product graph: {0}")]
    ProductCycle(String),

    /// A step reported a number of `output=` paths that cannot be matched to
    /// its declared outputs. This is an authoring error in the step
    /// declaration, not a step failure.
    #[error(
        "output mismatch for `{command}`: declared {declared:?}, discovered {discovered:?}"
    )]
    OutputMismatch {
        command: String,
        declared: Vec<String>,
        discovered: Vec<String>,
    },

    #[error("cannot find constraint `{0}`")]
    UnknownConstraint(String),

    #[error("load of constraint `{0}` would drop below zero")]
    ConstraintUnderflow(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PMonitorError>;
