// src/engine/monitor.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dag::{Step, Task};
use crate::errors::{PMonitorError, Result};
use crate::exec::{Invocation, ProcessRunner, StepRunner, TraceSink, LOCALHOST};
use crate::report::{Report, StatusFile, StatusSnapshot};
use crate::types::TaskId;

use super::core::{MonitorCore, Start};
use super::pool::WorkerPool;
use super::{MonitorOptions, StepEvent, StepObserver};

/// Workflow scheduler.
///
/// Steps are declared with [`execute`](Self::execute) and run on a worker
/// pool as soon as their inputs are available and their host and type
/// constraints allow. [`wait_for_completion`](Self::wait_for_completion)
/// waits for the pool to drain and reports whether anything failed or got
/// stuck.
///
/// Must be created inside a Tokio runtime. Dropping the monitor stops the
/// workers once they finish their current task.
pub struct PMonitor {
    inner: Arc<Inner>,
    workers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for PMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PMonitor")
            .field("layout", &self.inner.layout)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl PMonitor {
    /// Create a monitor that runs its steps through `runner`.
    ///
    /// Reads `<rundir>/<request>.report` if it exists (commands recorded
    /// there are skipped, bindings are restored) and creates the log
    /// directory. In simulation mode the report is never written.
    pub fn new(options: MonitorOptions, runner: Arc<dyn StepRunner>) -> Result<Self> {
        check_options(&options)?;
        tokio::runtime::Handle::try_current()
            .map_err(|err| PMonitorError::Config(format!("no Tokio runtime: {err}")))?;

        std::fs::create_dir_all(&options.logdir)
            .with_context(|| format!("creating log directory {:?}", options.logdir))?;

        let report_path = options.rundir.join(format!("{}.report", options.request));
        let (report, bindings) = if options.simulation {
            Report::read_only(&report_path)?
        } else {
            Report::open(&report_path)?
        };

        let core = MonitorCore::new(options.core_config(), report, bindings);
        let worker_count = core.hosts().total_capacity() as usize;
        let status = StatusFile::new(options.rundir.join(format!("{}.status", options.request)));
        let (released, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            core: Mutex::new(core),
            pool: WorkerPool::new(options.delay),
            runner,
            layout: Layout::from_options(&options),
            status,
            observer: options.observer.clone(),
            released,
            fatal: Mutex::new(None),
        });

        let handler = Arc::clone(&inner);
        let workers = inner
            .pool
            .spawn_workers(worker_count, move |task| Arc::clone(&handler).process(task));

        info!(
            request = %options.request,
            workers = worker_count,
            simulation = options.simulation,
            report = %report_path.display(),
            "pmonitor started"
        );

        Ok(Self { inner, workers })
    }

    /// Create a monitor that runs steps as local or `ssh` processes.
    pub fn with_process_runner(options: MonitorOptions) -> Result<Self> {
        Self::new(options, Arc::new(ProcessRunner::new()))
    }

    /// Declare a step.
    ///
    /// The step is dispatched right away if its inputs are available and
    /// its constraints allow; otherwise it waits in the backlog until a
    /// completing step makes it ready.
    pub fn execute(&self, step: Step) -> Result<()> {
        debug!(call = %step.call, inputs = ?step.inputs, outputs = ?step.outputs, "execute");
        let runnable = {
            let mut core = self.inner.core();
            let admitted = core.admit(step);
            self.inner.publish(&core);
            admitted?
        };
        self.inner.dispatch(runnable);
        Ok(())
    }

    /// Wait until no task is queued or running.
    ///
    /// Writes the final status file, including the remaining backlog, and
    /// returns 1 if any task failed or is stuck in the backlog, 0 otherwise.
    /// A fatal error raised while the workflow ran is returned as `Err`.
    pub async fn wait_for_completion(&self) -> Result<i32> {
        {
            let core = self.inner.core();
            self.inner.write_status(&core, false);
        }

        self.inner.pool.wait_drained().await;

        let (code, snapshot) = {
            let core = self.inner.core();
            self.inner.write_status(&core, true);
            (core.exit_code(), core.snapshot(false))
        };

        if let Some(err) = self.inner.take_fatal() {
            error!(error = %err, "workflow aborted");
            return Err(err);
        }

        info!(exit_code = code, "{}", snapshot.summary());
        Ok(code)
    }

    /// Wait until none of the type constraints of `calls` is fully loaded.
    pub async fn wait_for_idle(&self, calls: &[&str]) {
        let mut released = self.inner.released.subscribe();
        loop {
            let busy = self.inner.core().is_busy(calls);
            if !busy {
                return;
            }
            debug!(?calls, "waiting for step types to become idle");
            if released.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait for completion, then stop the workers.
    pub async fn finish(mut self) -> Result<i32> {
        let result = self.wait_for_completion().await;
        self.inner.pool.close();
        for worker in std::mem::take(&mut self.workers) {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker ended abnormally");
            }
        }
        result
    }

    /// Current counters, running and failed commands.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.core().snapshot(false)
    }
}

impl Drop for PMonitor {
    fn drop(&mut self) {
        self.inner.pool.close();
    }
}

/// Where things go on disk, and how command lines are built.
#[derive(Debug, Clone)]
struct Layout {
    request: String,
    swd: Option<PathBuf>,
    script: Option<String>,
    cache: Option<PathBuf>,
    logdir: PathBuf,
    simulation: bool,
}

impl Layout {
    fn from_options(options: &MonitorOptions) -> Self {
        Self {
            request: options.request.clone(),
            swd: options.swd.clone(),
            script: options.script.clone(),
            cache: options.cache.clone(),
            logdir: options.logdir.clone(),
            simulation: options.simulation,
        }
    }

    fn command_line(&self, task: &Task) -> String {
        task.command_line(self.swd.as_deref(), self.script.as_deref())
    }

    /// `<cache>/<request>/<id:04>`, or the current directory without cache.
    fn workdir(&self, id: TaskId) -> PathBuf {
        match &self.cache {
            Some(cache) => cache.join(&self.request).join(format!("{id:04}")),
            None => PathBuf::from("."),
        }
    }

    /// `<logdir>/<prefix>-<id:04>.out`; inside the working directory when a
    /// cache is used and no explicit log directory is set.
    fn trace_path(&self, prefix: &str, id: TaskId, workdir: &Path) -> PathBuf {
        let name = format!("{prefix}-{id:04}.out");
        if self.cache.is_some() && self.logdir == Path::new(".") {
            workdir.join(name)
        } else {
            self.logdir.join(name)
        }
    }
}

struct Inner {
    core: Mutex<MonitorCore>,
    pool: WorkerPool<Task>,
    runner: Arc<dyn StepRunner>,
    layout: Layout,
    status: StatusFile,
    observer: Option<Arc<dyn StepObserver>>,
    /// Bumped whenever scheduler state changed, which includes every
    /// constraint release.
    released: watch::Sender<u64>,
    /// First fatal error of the run.
    fatal: Mutex<Option<PMonitorError>>,
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, MonitorCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_status(&self, core: &MonitorCore, with_backlog: bool) {
        if let Err(err) = self.status.write(&core.snapshot(with_backlog)) {
            warn!(error = %err, "cannot write status file");
        }
    }

    /// Write the live status and wake `wait_for_idle` callers.
    fn publish(&self, core: &MonitorCore) {
        self.write_status(core, false);
        self.released.send_modify(|generation| *generation += 1);
    }

    fn dispatch(&self, tasks: Vec<Task>) {
        for task in tasks {
            debug!(
                task_id = task.id,
                call = %task.call,
                host = task.host.as_deref().unwrap_or(LOCALHOST),
                priority = task.priority,
                "dispatching task"
            );
            self.pool.submit(task.priority, task);
        }
    }

    /// Stop the run: drop everything not yet started and remember `err` for
    /// `wait_for_completion`. Running tasks finish normally.
    fn abort(&self, err: PMonitorError) {
        let dropped = self.pool.drop_queued();
        error!(error = %err, dropped, "fatal error, aborting run");
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }

    fn take_fatal(&self) -> Option<PMonitorError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Worker entry point for one task.
    async fn process(self: Arc<Self>, task: Task) {
        let command = self.layout.command_line(&task);

        let started = {
            let mut core = self.core();
            let started = core.start(&task, &command);
            self.publish(&core);
            started
        };
        match started {
            Ok(Start::Run) => {}
            Ok(Start::Skipped(runnable)) => {
                self.dispatch(runnable);
                self.observe(&task, 0, true);
                return;
            }
            Err(err) => {
                self.abort(err);
                return;
            }
        }

        let (code, discovered) = self.run(&task, &command).await;

        let completed = {
            let mut core = self.core();
            let completed = core.complete(&task, &command, code, &discovered);
            self.publish(&core);
            completed
        };
        let accepted = match completed {
            Ok(runnable) => {
                self.dispatch(runnable);
                true
            }
            Err(err) => {
                self.abort(err);
                false
            }
        };

        self.observe(&task, code, false);
        if accepted && code == 0 {
            self.clean_workdir(task.id).await;
        }
    }

    /// Run the command; returns its exit code and the discovered output
    /// paths. Anything that prevents the command from running counts as
    /// exit code -1.
    async fn run(&self, task: &Task, command: &str) -> (i32, Vec<String>) {
        if self.layout.simulation {
            info!(task_id = task.id, "simulating {command}");
            return (0, Vec::new());
        }

        let workdir = self.layout.workdir(task.id);
        if let Err(err) = tokio::fs::create_dir_all(&workdir).await {
            error!(task_id = task.id, error = %err, "cannot create working directory {:?}", workdir);
            return (-1, Vec::new());
        }

        let trace_path = self.layout.trace_path(&task.log_prefix, task.id, &workdir);
        let mut sink = match TraceSink::create(&trace_path).await {
            Ok(sink) => sink,
            Err(err) => {
                error!(task_id = task.id, error = %err, "cannot create trace file");
                return (-1, Vec::new());
            }
        };

        let invocation = Invocation {
            task_id: task.id,
            call: task.call.clone(),
            host: task.host.clone().unwrap_or_else(|| LOCALHOST.to_string()),
            command: command.to_string(),
            workdir,
        };

        match self.runner.run(&invocation, &mut sink).await {
            Ok(code) => (code, sink.into_discovered()),
            Err(err) => {
                error!(task_id = task.id, error = %err, "cannot run {command}");
                (-1, sink.into_discovered())
            }
        }
    }

    async fn clean_workdir(&self, id: TaskId) {
        if self.layout.simulation || self.layout.cache.is_none() {
            return;
        }
        let workdir = self.layout.workdir(id);
        if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(task_id = id, error = %err, "cannot remove working directory {:?}", workdir);
        }
    }

    fn observe(&self, task: &Task, code: i32, skipped: bool) {
        let Some(observer) = &self.observer else {
            return;
        };
        observer.observe_step(&StepEvent {
            task_id: task.id,
            call: task.call.clone(),
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            parameters: task.parameters.clone(),
            code,
            skipped,
        });
    }
}

fn check_options(options: &MonitorOptions) -> Result<()> {
    if options.hosts.is_empty() {
        return Err(PMonitorError::Config("at least one host is required".into()));
    }
    for (name, capacity) in options.hosts.iter().chain(&options.types) {
        if *capacity == 0 {
            return Err(PMonitorError::Config(format!(
                "capacity of `{name}` must be at least 1"
            )));
        }
    }
    let largest_host = options.hosts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    for (call, weight) in &options.weights {
        if *weight == 0 || *weight > largest_host {
            return Err(PMonitorError::Config(format!(
                "weight {weight} of `{call}` does not fit on any host"
            )));
        }
    }
    if options.logdir.as_os_str().is_empty() {
        return Err(PMonitorError::Config("log directory must not be empty".into()));
    }
    Ok(())
}
