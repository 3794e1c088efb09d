// src/dag/task.rs

//! Step declarations and the tasks the scheduler derives from them.

use std::path::Path;

use crate::types::{Priority, TaskId};

/// A processing step as declared by the caller of
/// [`PMonitor::execute`](crate::engine::PMonitor::execute).
///
/// ```
/// use pmonitor::dag::Step;
///
/// let step = Step::new("bin/meris-l2.sh")
///     .inputs(["/data/l1/a.N1", "/data/l1/b.N1"])
///     .outputs(["l2-2010-01"])
///     .collating(false);
/// assert_eq!(step.log_prefix(), "meris-l2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub call: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub parameters: Vec<String>,
    pub priority: Priority,
    /// One task consuming all inputs (`true`) or one task per input.
    pub collating: bool,
    pub log_prefix: Option<String>,
}

impl Step {
    pub fn new(call: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            priority: 1,
            collating: true,
            log_prefix: None,
        }
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn collating(mut self, collating: bool) -> Self {
        self.collating = collating;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    /// Prefix of the trace file names: the explicit prefix, or the basename
    /// of the call without a `.sh`/`.py` suffix.
    pub fn log_prefix(&self) -> String {
        if let Some(prefix) = &self.log_prefix {
            return prefix.clone();
        }
        let base = self.call.rsplit('/').next().unwrap_or(&self.call);
        base.strip_suffix(".sh")
            .or_else(|| base.strip_suffix(".py"))
            .unwrap_or(base)
            .to_string()
    }
}

/// What still has to happen to a task's inputs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// Inputs are concrete paths; the task can run as soon as its resources
    /// are granted.
    Resolved,
    /// Collating task whose input names still have to be translated into
    /// paths.
    NeedsTranslation,
    /// Non-collating task that still has to be expanded into one task per
    /// input path.
    NeedsExpansion,
}

/// A unit of work owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub call: String,
    pub parameters: Vec<String>,
    /// Product names until the task is resolved, paths afterwards.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Host the task was dispatched to; set when its resources are granted.
    pub host: Option<String>,
    pub log_prefix: String,
    pub priority: Priority,
    pub preparation: Preparation,
}

impl Task {
    /// A fan-out branch of this task for a single input path.
    pub fn branch(&self, id: TaskId, input: String) -> Task {
        Task {
            id,
            call: self.call.clone(),
            parameters: self.parameters.clone(),
            inputs: vec![input],
            outputs: self.outputs.clone(),
            host: None,
            log_prefix: self.log_prefix.clone(),
            priority: self.priority,
            preparation: Preparation::Resolved,
        }
    }

    /// The literal command line for this task.
    ///
    /// `<exe> <parameters> <inputs> <outputs>`, or with a wrapper script
    /// `<script> <call> <parameters> <inputs> <outputs>`. Relative
    /// executables are looked up below `swd` if one is configured.
    ///
    /// The groups are always separated by one space, so an empty group
    /// leaves a double (or trailing) space. Reports key on this exact text.
    pub fn command_line(&self, swd: Option<&Path>, script: Option<&str>) -> String {
        let groups = [
            self.parameters.join(" "),
            self.inputs.join(" "),
            self.outputs.join(" "),
        ];
        match script {
            Some(script) => format!(
                "{} {} {}",
                path_of_call(swd, script),
                self.call,
                groups.join(" ")
            ),
            None => format!("{} {}", path_of_call(swd, &self.call), groups.join(" ")),
        }
    }

    /// `b <call> <params> <inputs> <outputs>` line of the status file.
    pub fn backlog_line(&self) -> String {
        format!(
            "b {} {} {} {}",
            self.call,
            self.parameters.join(" "),
            self.inputs.join(" "),
            self.outputs.join(" ")
        )
    }
}

fn path_of_call(swd: Option<&Path>, call: &str) -> String {
    match swd {
        Some(swd) if !call.starts_with('/') => swd.join(call).to_string_lossy().into_owned(),
        _ => call.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(call: &str) -> Task {
        Task {
            id: 7,
            call: call.to_string(),
            parameters: vec!["-v".to_string()],
            inputs: vec!["/in/a".to_string(), "/in/b".to_string()],
            outputs: vec!["out".to_string()],
            host: None,
            log_prefix: "x".to_string(),
            priority: 1,
            preparation: Preparation::Resolved,
        }
    }

    #[test]
    fn log_prefix_strips_directory_and_script_suffix() {
        assert_eq!(Step::new("bin/meris-l3.sh").log_prefix(), "meris-l3");
        assert_eq!(Step::new("verify.py").log_prefix(), "verify");
        assert_eq!(Step::new("/usr/bin/gzip").log_prefix(), "gzip");
        assert_eq!(
            Step::new("bin/a.sh").with_log_prefix("custom").log_prefix(),
            "custom"
        );
    }

    #[test]
    fn command_line_without_swd_or_script() {
        assert_eq!(
            task("bin/l2.sh").command_line(None, None),
            "bin/l2.sh -v /in/a /in/b out"
        );
    }

    #[test]
    fn command_line_prefixes_relative_calls_with_swd() {
        let swd = Path::new("/opt/proc");
        assert_eq!(
            task("bin/l2.sh").command_line(Some(swd), None),
            "/opt/proc/bin/l2.sh -v /in/a /in/b out"
        );
        assert_eq!(
            task("/abs/l2.sh").command_line(Some(swd), None),
            "/abs/l2.sh -v /in/a /in/b out"
        );
    }

    #[test]
    fn command_line_with_wrapper_script() {
        let swd = Path::new("/opt/proc");
        assert_eq!(
            task("l2").command_line(Some(swd), Some("bin/wrap.sh")),
            "/opt/proc/bin/wrap.sh l2 -v /in/a /in/b out"
        );
    }

    #[test]
    fn empty_groups_keep_their_separators() {
        let mut t = task("bin/l2.sh");
        t.parameters.clear();
        assert_eq!(t.command_line(None, None), "bin/l2.sh  /in/a /in/b out");
        t.outputs.clear();
        assert_eq!(t.command_line(None, None), "bin/l2.sh  /in/a /in/b ");
        assert_eq!(
            t.command_line(None, Some("/bin/wrap.sh")),
            "/bin/wrap.sh bin/l2.sh  /in/a /in/b "
        );
    }

    #[test]
    fn branch_takes_a_single_resolved_input() {
        let mut parent = task("bin/l2.sh");
        parent.preparation = Preparation::NeedsExpansion;
        let branch = parent.branch(9, "/in/b".to_string());

        assert_eq!(branch.id, 9);
        assert_eq!(branch.inputs, vec!["/in/b".to_string()]);
        assert_eq!(branch.preparation, Preparation::Resolved);
        assert_eq!(branch.outputs, parent.outputs);
    }
}
