// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::{PMonitorError, Result};

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = PMonitorError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_workflow(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw.monitor, raw.step))
    }
}

/// Check a raw workflow file for everything that would make the monitor
/// reject it or leave steps stuck forever.
pub fn validate_workflow(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_steps(cfg)?;
    validate_monitor_section(cfg)?;
    validate_step_inputs(cfg)?;
    validate_product_graph(cfg)?;
    Ok(())
}

fn ensure_has_steps(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(PMonitorError::Config(
            "workflow must contain at least one [[step]] entry".to_string(),
        ));
    }
    Ok(())
}

fn ensure_unique<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(PMonitorError::Config(format!(
                "[monitor].{section} lists '{name}' more than once"
            )));
        }
    }
    Ok(())
}

fn validate_monitor_section(cfg: &RawWorkflowFile) -> Result<()> {
    let m = &cfg.monitor;

    if m.hosts.is_empty() {
        return Err(PMonitorError::Config(
            "[monitor].hosts must list at least one host".to_string(),
        ));
    }

    for (section, entries) in [("hosts", &m.hosts), ("types", &m.types)] {
        ensure_unique(section, entries.iter().map(|e| e.name.as_str()))?;
        if let Some(entry) = entries.iter().find(|e| e.capacity == 0) {
            return Err(PMonitorError::Config(format!(
                "[monitor].{section}: capacity of '{}' must be >= 1 (got 0)",
                entry.name
            )));
        }
    }

    ensure_unique("weights", m.weights.iter().map(|w| w.name.as_str()))?;
    let largest_host = m.hosts.iter().map(|h| h.capacity).max().unwrap_or(0);
    for weight in &m.weights {
        if weight.weight == 0 || weight.weight > largest_host {
            return Err(PMonitorError::Config(format!(
                "[monitor].weights: weight {} of '{}' does not fit on any host (largest capacity {})",
                weight.weight, weight.name, largest_host
            )));
        }
    }

    if m.logdir.as_os_str().is_empty() {
        return Err(PMonitorError::Config(
            "[monitor].logdir must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_step_inputs(cfg: &RawWorkflowFile) -> Result<()> {
    let mut known: HashSet<&str> = cfg.monitor.inputs.iter().map(String::as_str).collect();
    known.extend(
        cfg.step
            .iter()
            .flat_map(|s| s.outputs.iter().map(String::as_str)),
    );

    for (index, step) in cfg.step.iter().enumerate() {
        if step.call.trim().is_empty() {
            return Err(PMonitorError::Config(format!(
                "step #{} has an empty `call`",
                index + 1
            )));
        }
        for input in &step.inputs {
            if !known.contains(input.as_str()) {
                return Err(PMonitorError::Config(format!(
                    "step '{}' has input '{}' that is neither a seed input nor an output of any step",
                    step.call, input
                )));
            }
        }
    }
    Ok(())
}

fn validate_product_graph(cfg: &RawWorkflowFile) -> Result<()> {
    // Edge direction: input -> output, for every step.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for step in &cfg.step {
        for input in &step.inputs {
            graph.add_node(input.as_str());
            for output in &step.outputs {
                graph.add_edge(input.as_str(), output.as_str(), ());
            }
        }
        for output in &step.outputs {
            graph.add_node(output.as_str());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(PMonitorError::ProductCycle(format!(
            "cycle detected in product graph involving '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RawWorkflowFile {
        toml::from_str(text).expect("valid TOML")
    }

    #[test]
    fn minimal_workflow_is_valid() {
        let raw = parse(
            r#"
            [monitor]
            inputs = ["/in/a"]

            [[step]]
            call = "bin/a.sh"
            inputs = ["/in/a"]
            outputs = ["x"]
            "#,
        );
        assert!(WorkflowFile::try_from(raw).is_ok());
    }

    #[test]
    fn unknown_input_is_rejected() {
        let raw = parse(
            r#"
            [[step]]
            call = "bin/a.sh"
            inputs = ["nowhere"]
            "#,
        );
        match validate_workflow(&raw) {
            Err(PMonitorError::Config(msg)) => assert!(msg.contains("nowhere"), "{msg}"),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn product_cycle_is_rejected() {
        let raw = parse(
            r#"
            [[step]]
            call = "a.sh"
            inputs = ["y"]
            outputs = ["x"]

            [[step]]
            call = "b.sh"
            inputs = ["x"]
            outputs = ["y"]
            "#,
        );
        assert!(matches!(
            validate_workflow(&raw),
            Err(PMonitorError::ProductCycle(_))
        ));
    }

    #[test]
    fn duplicate_hosts_are_rejected() {
        let raw = parse(
            r#"
            [monitor]
            hosts = [{ name = "a", capacity = 1 }, { name = "a", capacity = 2 }]

            [[step]]
            call = "a.sh"
            "#,
        );
        assert!(matches!(validate_workflow(&raw), Err(PMonitorError::Config(_))));
    }

    #[test]
    fn zero_type_capacity_is_rejected() {
        let raw = parse(
            r#"
            [monitor]
            types = [{ name = "a.sh", capacity = 0 }]

            [[step]]
            call = "a.sh"
            "#,
        );
        assert!(matches!(validate_workflow(&raw), Err(PMonitorError::Config(_))));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let raw = parse("[monitor]\nrequest = \"r\"\n");
        assert!(matches!(validate_workflow(&raw), Err(PMonitorError::Config(_))));
    }
}
