// src/engine/core.rs

//! Pure, synchronous scheduling core.
//!
//! `MonitorCore` owns every piece of mutable scheduler state: the backlog,
//! the product table, host and type constraints, the counters, the
//! running/failed lists and the report handle. It never spawns, sleeps or
//! awaits. Each operation takes `&mut self` and returns the tasks that have
//! become runnable, which the async shell in [`monitor`](super::monitor)
//! then submits to the worker pool.
//!
//! Every task handed out by this type holds its constraints (a host slot of
//! the call's weight, plus one slot of the call's type constraint if it has
//! one) and must be passed back exactly once, through either
//! [`MonitorCore::start`] (skip path) or [`MonitorCore::complete`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, error, info, warn};

use crate::dag::{reconcile_outputs, Binding, Preparation, ProductTable, Step, Task};
use crate::engine::constraint::ConstraintSet;
use crate::errors::Result;
use crate::report::{Report, StatusSnapshot};
use crate::types::{Priority, ScanMode, TaskId};

/// Static scheduling configuration of a [`MonitorCore`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Seed product names, available from the start.
    pub inputs: Vec<String>,
    pub hosts: Vec<(String, u32)>,
    pub types: Vec<(String, u32)>,
    pub weights: Vec<(String, u32)>,
    pub scan: ScanMode,
}

/// What the worker should do with a task it picked up.
#[derive(Debug, PartialEq, Eq)]
pub enum Start {
    /// The command succeeded in a previous run. Its constraints are already
    /// released; the contained tasks became runnable as a consequence.
    Skipped(Vec<Task>),
    /// The command has to be run and is now listed as running.
    Run,
}

#[derive(Debug)]
pub struct MonitorCore {
    scan: ScanMode,
    hosts: ConstraintSet,
    types: ConstraintSet,
    weights: HashMap<String, u32>,
    products: ProductTable,
    report: Report,
    backlog: Vec<Task>,
    created: u64,
    processed: u64,
    running: BTreeMap<TaskId, String>,
    failed: Vec<String>,
    /// Set when products became available in the middle of a scan or an
    /// admission, so the backlog has to be looked at again.
    rescan: bool,
}

impl MonitorCore {
    /// Build the core. `bindings` are the `#output` lines of a previous
    /// report and are applied on top of the seed inputs.
    pub fn new(config: CoreConfig, report: Report, bindings: Vec<Binding>) -> Self {
        let mut products = ProductTable::new();
        products.mark_inputs(config.inputs);
        for binding in bindings {
            products.bind_output(&binding.name, binding.paths);
        }

        Self {
            scan: config.scan,
            hosts: ConstraintSet::new(config.hosts),
            types: ConstraintSet::new(config.types),
            weights: config.weights.into_iter().collect(),
            products,
            report,
            backlog: Vec::new(),
            created: 0,
            processed: 0,
            running: BTreeMap::new(),
            failed: Vec::new(),
            rescan: false,
        }
    }

    /// Admit a step declaration.
    ///
    /// Returns the tasks that can run right away: the step itself, or for a
    /// non-collating step every fan-out branch whose constraints could be
    /// acquired. Everything else goes to the backlog.
    pub fn admit(&mut self, step: Step) -> Result<Vec<Task>> {
        self.created += 1;
        self.products.expect_outputs(&step.outputs);

        let log_prefix = step.log_prefix();
        let mut task = Task {
            id: self.created,
            preparation: if step.collating {
                Preparation::NeedsTranslation
            } else {
                Preparation::NeedsExpansion
            },
            call: step.call,
            parameters: step.parameters,
            inputs: step.inputs,
            outputs: step.outputs,
            host: None,
            log_prefix,
            priority: step.priority,
        };

        let mut runnable = Vec::new();
        if self.products.all_available(&task.inputs) {
            if let Some(host) = self.try_acquire(&task.call) {
                task.host = Some(host);
                let leftovers = self.prepare(task, &mut runnable)?;
                self.backlog.extend(leftovers);
                if self.rescan {
                    self.scan_backlog(&mut runnable)?;
                }
                return Ok(runnable);
            }
        }

        debug!(task_id = task.id, call = %task.call, "task backlogged");
        self.backlog.push(task);
        Ok(runnable)
    }

    /// Decide whether a picked-up task runs or is skipped.
    ///
    /// A command found in the report of a previous run is skipped: its
    /// constraints are released, its outputs are marked as bound to their
    /// own names (or to what the report recorded), it counts as processed,
    /// and the backlog is rescanned.
    pub fn start(&mut self, task: &Task, command: &str) -> Result<Start> {
        if self.report.contains(command) {
            info!(task_id = task.id, "skipping {command}");
            self.release(task)?;
            self.products.mark_outputs(&task.outputs);
            self.processed += 1;
            let mut runnable = Vec::new();
            self.scan_backlog(&mut runnable)?;
            return Ok(Start::Skipped(runnable));
        }

        self.running.insert(task.id, command.to_string());
        Ok(Start::Run)
    }

    /// Record the outcome of a task that was run.
    ///
    /// Exit code 0 appends the command and its output bindings to the
    /// report; anything else lists the command as failed, leaving its
    /// outputs pending for good. Either way the constraints are released and
    /// the backlog is rescanned.
    ///
    /// A discovered output list that does not fit the declared outputs is
    /// returned as an error after the task has been listed as failed; the
    /// command is not reported as done.
    pub fn complete(
        &mut self,
        task: &Task,
        command: &str,
        code: i32,
        discovered: &[String],
    ) -> Result<Vec<Task>> {
        self.release(task)?;
        self.running.remove(&task.id);

        if code == 0 {
            let bindings = match reconcile_outputs(command, &task.outputs, discovered) {
                Ok(bindings) => bindings,
                Err(err) => {
                    self.failed.push(command.to_string());
                    return Err(err);
                }
            };
            self.report.append_command(command)?;
            self.products.mark_outputs(&task.outputs);
            for binding in bindings {
                self.report.append_binding(&binding)?;
                self.products.bind_output(&binding.name, binding.paths);
            }
            self.report.flush()?;
            self.processed += 1;
            debug!(task_id = task.id, "task succeeded");
        } else {
            error!(task_id = task.id, exit_code = code, "failed {command}");
            self.failed.push(command.to_string());
        }

        let mut runnable = Vec::new();
        self.scan_backlog(&mut runnable)?;
        Ok(runnable)
    }

    /// Whether any of the named type constraints is fully loaded. Names
    /// without a type constraint never count as busy.
    pub fn is_busy(&self, calls: &[&str]) -> bool {
        calls
            .iter()
            .filter_map(|call| self.types.get(call))
            .any(|constraint| constraint.is_full())
    }

    pub fn snapshot(&self, with_backlog: bool) -> StatusSnapshot {
        StatusSnapshot {
            created: self.created,
            processed: self.processed,
            running: self.running.values().cloned().collect(),
            failed: self.failed.clone(),
            backlog: self.backlog.len(),
            backlog_lines: if with_backlog {
                self.backlog.iter().map(Task::backlog_line).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// 1 if any task failed or is still stuck in the backlog, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() && self.backlog.is_empty() {
            0
        } else {
            1
        }
    }

    pub fn hosts(&self) -> &ConstraintSet {
        &self.hosts
    }

    pub fn types(&self) -> &ConstraintSet {
        &self.types
    }

    pub fn products(&self) -> &ProductTable {
        &self.products
    }

    pub fn backlog(&self) -> &[Task] {
        &self.backlog
    }

    fn weight_of(&self, call: &str) -> u32 {
        self.weights.get(call).copied().unwrap_or(1)
    }

    /// Acquire a host slot and, if the call has one, a type slot.
    ///
    /// Nothing is charged when either is unavailable.
    fn try_acquire(&mut self, call: &str) -> Option<String> {
        let typed = match self.types.get(call) {
            Some(constraint) if constraint.is_full() => return None,
            Some(_) => true,
            None => false,
        };
        let weight = self.weight_of(call);
        let host = self.hosts.select(weight)?;
        if typed {
            self.types.acquire(call, 1);
        }
        Some(host)
    }

    fn release(&mut self, task: &Task) -> Result<()> {
        if let Some(host) = &task.host {
            let weight = self.weight_of(&task.call);
            self.hosts.release(host, weight)?;
        }
        if self.types.get(&task.call).is_some() {
            self.types.release(&task.call, 1)?;
        }
        Ok(())
    }

    /// Finish preparing a task whose constraints are held and whose inputs
    /// are available. Runnable tasks are pushed to `runnable`; fan-out
    /// branches that could not get constraints are returned.
    fn prepare(&mut self, mut task: Task, runnable: &mut Vec<Task>) -> Result<Vec<Task>> {
        match task.preparation {
            Preparation::Resolved => {
                runnable.push(task);
                Ok(Vec::new())
            }
            Preparation::NeedsTranslation => {
                task.inputs = self.products.paths_of(&task.inputs);
                task.preparation = Preparation::Resolved;
                runnable.push(task);
                Ok(Vec::new())
            }
            Preparation::NeedsExpansion => self.expand(task, runnable),
        }
    }

    /// Fan a non-collating task out into one branch per input path.
    ///
    /// The first branch inherits the constraints held by `task`. Every
    /// further branch gets its own id, registers one more pending producer
    /// for each output and acquires its own constraints.
    fn expand(&mut self, task: Task, runnable: &mut Vec<Task>) -> Result<Vec<Task>> {
        let mut paths = self.products.paths_of(&task.inputs).into_iter();

        let Some(first) = paths.next() else {
            // No input paths: there is nothing to run, but the outputs still
            // have to become available.
            warn!(task_id = task.id, call = %task.call, "fan-out over no inputs");
            self.release(&task)?;
            self.products.mark_outputs(&task.outputs);
            self.processed += 1;
            self.rescan = true;
            return Ok(Vec::new());
        };

        let mut head = task.branch(task.id, first);
        head.host = task.host.clone();
        runnable.push(head);

        let mut leftovers = Vec::new();
        for path in paths {
            self.created += 1;
            self.products.expect_outputs(&task.outputs);
            let mut branch = task.branch(self.created, path);
            match self.try_acquire(&branch.call) {
                Some(host) => {
                    branch.host = Some(host);
                    runnable.push(branch);
                }
                None => {
                    debug!(task_id = branch.id, call = %branch.call, "branch backlogged");
                    leftovers.push(branch);
                }
            }
        }
        Ok(leftovers)
    }

    fn scan_backlog(&mut self, runnable: &mut Vec<Task>) -> Result<()> {
        loop {
            self.rescan = false;
            self.scan_once(runnable)?;
            if !self.rescan {
                return Ok(());
            }
        }
    }

    /// One pass over the input-ready part of the backlog.
    ///
    /// Ready tasks are tried by priority, and in creation order within the
    /// same priority. Tasks whose inputs are not available yet are passed
    /// over. In fair mode the pass stops at the first ready task whose
    /// constraints are not available, and after an expansion that left
    /// branches behind. Leftover branches take the backlog position of the
    /// task they were expanded from.
    fn scan_once(&mut self, runnable: &mut Vec<Task>) -> Result<()> {
        let fair = self.scan == ScanMode::Fair;
        let mut slots: Vec<Option<Task>> =
            std::mem::take(&mut self.backlog).into_iter().map(Some).collect();

        let mut ready: Vec<(Priority, usize)> = slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let task = slot.as_ref()?;
                let ready = task.preparation == Preparation::Resolved
                    || self.products.all_available(&task.inputs);
                ready.then_some((task.priority, index))
            })
            .collect();
        ready.sort_unstable();

        let mut leftovers: Vec<Vec<Task>> = slots.iter().map(|_| Vec::new()).collect();
        for (_, index) in ready {
            let Some(mut task) = slots[index].take() else {
                continue;
            };
            match self.try_acquire(&task.call) {
                None => {
                    slots[index] = Some(task);
                    if fair {
                        break;
                    }
                }
                Some(host) => {
                    debug!(task_id = task.id, host = %host, "task matured");
                    task.host = Some(host);
                    let left = self.prepare(task, runnable)?;
                    let stalled = !left.is_empty();
                    leftovers[index] = left;
                    if stalled && fair {
                        break;
                    }
                }
            }
        }

        self.backlog = slots
            .into_iter()
            .zip(leftovers)
            .flat_map(|(slot, left)| slot.into_iter().chain(left))
            .collect();
        Ok(())
    }
}
