// src/dag/products.rs

//! Bindings of logical product names to concrete paths.

use std::collections::HashMap;

use crate::errors::{PMonitorError, Result};

/// Logical product name.
pub type ProductName = String;

/// A product name rebound to the concrete paths a step reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: ProductName,
    pub paths: Vec<String>,
}

/// Product binding table plus pending counts of outputs still being
/// produced.
///
/// - `paths[name] == None` means the product is bound and its path is the
///   name itself (seed inputs, outputs whose step reported nothing).
/// - `paths[name] == Some(list)` means the product materialised as `list`.
/// - `pending[name] == n` means `n` declared producers of `name` have not yet
///   finished. Such a product is unavailable, even if partially bound.
#[derive(Debug, Clone, Default)]
pub struct ProductTable {
    paths: HashMap<ProductName, Option<Vec<String>>>,
    pending: HashMap<ProductName, usize>,
}

impl ProductTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark seed inputs as bound to their own names.
    pub fn mark_inputs<I, S>(&mut self, inputs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for input in inputs {
            self.paths.entry(input.into()).or_insert(None);
        }
    }

    /// Register one more pending producer for each output.
    pub fn expect_outputs(&mut self, outputs: &[String]) {
        for output in outputs {
            *self.pending.entry(output.clone()).or_insert(0) += 1;
        }
    }

    /// Mark outputs of one finished (or skipped) producer as bound and count
    /// down their pending producers.
    pub fn mark_outputs(&mut self, outputs: &[String]) {
        for output in outputs {
            self.paths.entry(output.clone()).or_insert(None);
            if let Some(n) = self.pending.get_mut(output) {
                if *n <= 1 {
                    self.pending.remove(output);
                } else {
                    *n -= 1;
                }
            }
        }
    }

    /// Bind `name` to `paths`, or extend its existing paths.
    pub fn bind_output(&mut self, name: &str, paths: Vec<String>) {
        match self.paths.get_mut(name) {
            Some(Some(existing)) => existing.extend(paths),
            _ => {
                self.paths.insert(name.to_string(), Some(paths));
            }
        }
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.paths.contains_key(name) && !self.pending.contains_key(name)
    }

    /// Whether every input is bound and none of them waits for more
    /// producers.
    pub fn all_available(&self, inputs: &[String]) -> bool {
        inputs.iter().all(|input| self.is_available(input))
    }

    pub fn pending_count(&self, name: &str) -> usize {
        self.pending.get(name).copied().unwrap_or(0)
    }

    /// Paths a product is bound to; the name itself if it is bound to itself
    /// or unknown.
    pub fn path_of(&self, product: &str) -> Vec<String> {
        match self.paths.get(product) {
            Some(Some(paths)) => paths.clone(),
            _ => vec![product.to_string()],
        }
    }

    /// Flat list of the paths of all `inputs`, in input order.
    pub fn paths_of(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().flat_map(|input| self.path_of(input)).collect()
    }
}

/// Decide how the paths a step printed as `output=<path>` map onto its
/// declared outputs.
///
/// - nothing discovered: every output stays bound to its own name
/// - as many paths as outputs: positional, skipping paths equal to the name
/// - a single output: bound to the full list
/// - anything else: [`PMonitorError::OutputMismatch`]
pub fn reconcile_outputs(
    command: &str,
    outputs: &[String],
    discovered: &[String],
) -> Result<Vec<Binding>> {
    if discovered.is_empty() {
        return Ok(Vec::new());
    }

    if outputs.len() == discovered.len() {
        return Ok(outputs
            .iter()
            .zip(discovered)
            .filter(|(name, path)| name != path)
            .map(|(name, path)| Binding {
                name: name.clone(),
                paths: vec![path.clone()],
            })
            .collect());
    }

    if outputs.len() == 1 {
        return Ok(vec![Binding {
            name: outputs[0].clone(),
            paths: discovered.to_vec(),
        }]);
    }

    Err(PMonitorError::OutputMismatch {
        command: command.to_string(),
        declared: outputs.to_vec(),
        discovered: discovered.to_vec(),
    })
}
