use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pmonitor::engine::{StepEvent, StepObserver};
use pmonitor::errors::Result;
use pmonitor::exec::{Invocation, StepRunner, TraceSink};

/// What a fake step does when it is run.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Lines printed by the step, in order.
    pub lines: Vec<String>,
    pub code: i32,
    /// How long the step "runs" before printing anything.
    pub sleep: Option<Duration>,
    /// The step cannot be launched at all.
    pub unlaunchable: bool,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn unlaunchable() -> Self {
        Self {
            unlaunchable: true,
            ..Self::default()
        }
    }

    /// Print `output=<path>`.
    pub fn output(mut self, path: &str) -> Self {
        self.lines.push(format!("output={path}"));
        self
    }

    pub fn line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.sleep = Some(duration);
        self
    }
}

#[derive(Default)]
struct State {
    by_command: HashMap<String, Script>,
    by_call: HashMap<String, Script>,
    invocations: Vec<Invocation>,
    running: usize,
    max_running: usize,
}

/// A fake step runner that:
/// - records every invocation in start order
/// - plays back a scripted output and exit code, looked up by exact command
///   line first and by call second (default: exit 0, no output)
/// - tracks the largest number of steps running at the same time.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<State>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call(self, call: &str, script: Script) -> Self {
        self.state
            .lock()
            .unwrap()
            .by_call
            .insert(call.to_string(), script);
        self
    }

    pub fn with_command(self, command: &str, script: Script) -> Self {
        self.state
            .lock()
            .unwrap()
            .by_command
            .insert(command.to_string(), script);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// Command lines in start order.
    pub fn commands(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.command).collect()
    }

    /// Calls in start order.
    pub fn calls(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.call).collect()
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    fn begin(&self, invocation: &Invocation) -> Script {
        let mut state = self.state.lock().unwrap();
        state.invocations.push(invocation.clone());
        state.running += 1;
        state.max_running = state.max_running.max(state.running);
        state
            .by_command
            .get(&invocation.command)
            .or_else(|| state.by_call.get(&invocation.call))
            .cloned()
            .unwrap_or_default()
    }

    fn end(&self) {
        self.state.lock().unwrap().running -= 1;
    }
}

impl StepRunner for FakeRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a mut TraceSink,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        Box::pin(async move {
            let script = self.begin(invocation);
            if script.unlaunchable {
                self.end();
                return Err(anyhow::anyhow!("cannot launch {}", invocation.command).into());
            }
            if let Some(duration) = script.sleep {
                tokio::time::sleep(duration).await;
            }
            for line in &script.lines {
                sink.line(line).await?;
            }
            self.end();
            Ok(script.code)
        })
    }
}

/// Observer that keeps every event it is handed.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StepEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StepObserver for RecordingObserver {
    fn observe_step(&self, event: &StepEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
