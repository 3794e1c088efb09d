// src/exec/process.rs

//! Production step runner: local `sh -c` or remote `ssh`.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::backend::{Invocation, StepRunner};
use crate::exec::trace::TraceSink;

/// Runs steps as OS processes.
///
/// Local invocations run the command line through `sh -c` inside the
/// working directory. Remote invocations wrap it as
/// `ssh <host> 'mkdir -p <wd>; cd <wd>; <command>'`. In both cases stderr is
/// merged into stdout so the trace file keeps the original interleaving.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// The shell command line actually handed to `sh -c`.
    pub fn shell_line(invocation: &Invocation) -> String {
        let line = if invocation.is_local() {
            invocation.command.clone()
        } else {
            let wd = invocation.workdir.display();
            format!(
                "ssh {} 'mkdir -p {wd}; cd {wd}; {}'",
                invocation.host, invocation.command
            )
        };
        format!("exec 2>&1; {line}")
    }
}

impl StepRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a mut TraceSink,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        Box::pin(async move { run_process(invocation, sink).await })
    }
}

async fn run_process(invocation: &Invocation, sink: &mut TraceSink) -> Result<i32> {
    let shell_line = ProcessRunner::shell_line(invocation);
    info!(
        task_id = invocation.task_id,
        host = %invocation.host,
        workdir = %invocation.workdir.display(),
        "executing {}",
        invocation.command
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&shell_line)
        .current_dir(&invocation.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task {}", invocation.task_id))?;

    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("reading output of task {}", invocation.task_id))?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            sink.line(line.trim_end_matches(['\n', '\r'])).await?;
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task {}", invocation.task_id))?;
    let code = status.code().unwrap_or(-1);

    debug!(
        task_id = invocation.task_id,
        exit_code = code,
        lines = sink.line_count(),
        "process exited"
    );

    Ok(code)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn invocation(host: &str) -> Invocation {
        Invocation {
            task_id: 3,
            call: "bin/l2.sh".to_string(),
            host: host.to_string(),
            command: "bin/l2.sh in out".to_string(),
            workdir: PathBuf::from("/cache/req/0003"),
        }
    }

    #[test]
    fn local_invocation_runs_command_directly() {
        assert_eq!(
            ProcessRunner::shell_line(&invocation("localhost")),
            "exec 2>&1; bin/l2.sh in out"
        );
    }

    #[test]
    fn remote_invocation_goes_through_ssh() {
        assert_eq!(
            ProcessRunner::shell_line(&invocation("phost2")),
            "exec 2>&1; ssh phost2 'mkdir -p /cache/req/0003; cd /cache/req/0003; bin/l2.sh in out'"
        );
    }
}
