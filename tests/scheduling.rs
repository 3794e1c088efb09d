mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use pmonitor::engine::PMonitor;
use pmonitor::errors::PMonitorError;
use pmonitor::Step;
use tempfile::tempdir;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test]
async fn simulated_three_stage_pipeline_drains_backlog() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/l1/a", "/l1/b", "/l1/c"])
        .host("localhost", 2)
        .simulation(true)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    // Declared before anything produces `raw`.
    monitor
        .execute(Step::new("transform.sh").inputs(["raw"]).outputs(["clean"]))
        .unwrap();
    monitor
        .execute(
            Step::new("ingest.sh")
                .inputs(["/l1/a", "/l1/b", "/l1/c"])
                .outputs(["raw"])
                .collating(false),
        )
        .unwrap();
    monitor
        .execute(Step::new("aggregate.sh").inputs(["clean"]).outputs(["agg"]))
        .unwrap();

    let code = with_timeout(monitor.finish()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(
        status_line(dir.path(), "test"),
        "5 created, 0 running, 0 backlog, 5 processed, 0 failed"
    );
    assert!(runner.invocations().is_empty(), "simulation runs nothing");
    assert!(
        !dir.path().join("test.report").exists(),
        "simulation never writes the report"
    );
}

#[tokio::test]
async fn lower_priority_value_is_dispatched_first() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("produce.sh", Script::ok().sleep(ms(30)));
    let observer = RecordingObserver::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in"])
        .observer(observer.clone())
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    // One slot, and both consumers become ready on the same completion.
    monitor
        .execute(Step::new("produce.sh").inputs(["/in"]).outputs(["x"]))
        .unwrap();
    monitor
        .execute(Step::new("later.sh").inputs(["x"]).priority(2))
        .unwrap();
    monitor
        .execute(Step::new("first.sh").inputs(["x"]).priority(1))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(
        runner.calls(),
        vec![
            "produce.sh".to_string(),
            "first.sh".to_string(),
            "later.sh".to_string()
        ]
    );
    let calls: Vec<String> = observer.events().into_iter().map(|e| e.call).collect();
    assert_eq!(calls, runner.calls());
}

#[tokio::test]
async fn rerun_skips_commands_from_previous_report() {
    init_tracing();
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("test.report"),
        "a.sh  /in/a x\n#output x /real/x\n",
    )
    .unwrap();

    let runner = FakeRunner::new();
    let observer = RecordingObserver::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .observer(observer.clone())
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x"]))
        .unwrap();
    monitor
        .execute(Step::new("b.sh").inputs(["x"]).outputs(["y"]))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(runner.commands(), vec!["b.sh  /real/x y".to_string()]);
    assert_eq!(
        report_text(dir.path(), "test"),
        "a.sh  /in/a x\n#output x /real/x\nb.sh  /real/x y\n"
    );
    assert_eq!(
        status_line(dir.path(), "test"),
        "2 created, 0 running, 0 backlog, 2 processed, 0 failed"
    );

    let events = observer.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].skipped && events[0].call == "a.sh");
    assert!(!events[1].skipped && events[1].call == "b.sh");
}

#[tokio::test]
async fn fan_out_output_is_available_only_after_every_branch() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new()
        .with_command("l2.sh  /l1/a l2", Script::ok().output("/p/a").sleep(ms(10)))
        .with_command("l2.sh  /l1/b l2", Script::ok().output("/p/b").sleep(ms(40)))
        .with_command("l2.sh  /l1/c l2", Script::ok().output("/p/c").sleep(ms(20)));
    let observer = RecordingObserver::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/l1/a", "/l1/b", "/l1/c"])
        .host("localhost", 4)
        .observer(observer.clone())
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(
            Step::new("l2.sh")
                .inputs(["/l1/a", "/l1/b", "/l1/c"])
                .outputs(["l2"])
                .collating(false),
        )
        .unwrap();
    monitor
        .execute(Step::new("l3.sh").inputs(["l2"]).outputs(["l3"]))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();
    assert_eq!(code, 0);

    let events = observer.events();
    let calls: Vec<&str> = events.iter().map(|e| e.call.as_str()).collect();
    assert_eq!(calls, vec!["l2.sh", "l2.sh", "l2.sh", "l3.sh"]);

    let l3_inputs: HashSet<&str> = events[3].inputs.iter().map(String::as_str).collect();
    assert_eq!(l3_inputs, HashSet::from(["/p/a", "/p/b", "/p/c"]));
    assert_eq!(runner.calls().iter().filter(|c| *c == "l3.sh").count(), 1);
}

#[tokio::test]
async fn failed_step_leaves_dependants_in_backlog() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("a.sh", Script::exit(3));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a", "/in/b"])
        .host("localhost", 2)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x"]))
        .unwrap();
    monitor
        .execute(Step::new("b.sh").inputs(["x"]).outputs(["y"]))
        .unwrap();
    monitor
        .execute(Step::new("c.sh").inputs(["/in/b"]).outputs(["z"]))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 1);
    let status = status_text(dir.path(), "test");
    let lines: Vec<&str> = status.lines().collect();
    assert_eq!(
        lines,
        vec![
            "3 created, 0 running, 1 backlog, 1 processed, 1 failed",
            "f a.sh  /in/a x",
            "b b.sh  x y",
        ]
    );

    let mut calls = runner.calls();
    calls.sort();
    assert_eq!(calls, vec!["a.sh".to_string(), "c.sh".to_string()]);

    let report = report_text(dir.path(), "test");
    assert!(report.contains("c.sh  /in/b z"));
    assert!(!report.contains("a.sh"));
}

#[tokio::test]
async fn step_that_cannot_launch_counts_as_failed() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("a.sh", Script::unlaunchable());
    let observer = RecordingObserver::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .observer(observer.clone())
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner)).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x"]))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 1);
    assert_eq!(monitor.status().failed, vec!["a.sh  /in/a x".to_string()]);
    assert_eq!(observer.events()[0].code, -1);
}

#[tokio::test]
async fn output_mismatch_aborts_the_run() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("a.sh", Script::ok().output("/p/1"));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner)).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x", "y"]))
        .unwrap();
    let result = with_timeout(monitor.wait_for_completion()).await;

    match result {
        Err(PMonitorError::OutputMismatch {
            command,
            declared,
            discovered,
        }) => {
            assert_eq!(command, "a.sh  /in/a x y");
            assert_eq!(declared, vec!["x".to_string(), "y".to_string()]);
            assert_eq!(discovered, vec!["/p/1".to_string()]);
        }
        other => panic!("expected OutputMismatch, got {other:?}"),
    }
    assert!(!report_text(dir.path(), "test").contains("a.sh"));
}

#[tokio::test]
async fn wait_for_idle_returns_once_type_has_capacity() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("l2.sh", Script::ok().sleep(ms(100)));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .host("localhost", 2)
        .type_limit("l2.sh", 1)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner)).unwrap();

    monitor
        .execute(Step::new("l2.sh").inputs(["/in/a"]).outputs(["l2"]))
        .unwrap();
    assert_eq!(monitor.status().processed, 0);

    with_timeout(monitor.wait_for_idle(&["l2.sh", "unconstrained.sh"])).await;
    assert_eq!(monitor.status().processed, 1);

    with_timeout(monitor.wait_for_completion()).await.unwrap();
}

#[tokio::test]
async fn type_limit_serialises_steps_of_one_call() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("l2.sh", Script::ok().sleep(ms(20)));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a", "/in/b", "/in/c", "/in/d"])
        .host("localhost", 3)
        .type_limit("l2.sh", 1)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(
            Step::new("l2.sh")
                .inputs(["/in/a", "/in/b", "/in/c", "/in/d"])
                .outputs(["l2"])
                .collating(false),
        )
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(runner.invocations().len(), 4);
    assert_eq!(runner.max_concurrency(), 1);
}

#[tokio::test]
async fn weighted_steps_occupy_several_slots() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("big.sh", Script::ok().sleep(ms(20)));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a", "/in/b", "/in/c"])
        .host("localhost", 2)
        .weight("big.sh", 2)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    for input in ["/in/a", "/in/b", "/in/c"] {
        monitor.execute(Step::new("big.sh").inputs([input])).unwrap();
    }
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(runner.invocations().len(), 3);
    assert_eq!(runner.max_concurrency(), 1);
}

#[tokio::test]
async fn tasks_spread_over_least_loaded_hosts() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new().with_call("a.sh", Script::ok().sleep(ms(50)));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a", "/in/b"])
        .host("node1", 1)
        .host("node2", 1)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor.execute(Step::new("a.sh").inputs(["/in/a"])).unwrap();
    monitor.execute(Step::new("a.sh").inputs(["/in/b"])).unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    let hosts: HashSet<String> = runner.invocations().into_iter().map(|i| i.host).collect();
    assert_eq!(hosts, HashSet::from(["node1".to_string(), "node2".to_string()]));
    assert_eq!(runner.max_concurrency(), 2);
}

#[tokio::test]
async fn cache_workdir_is_used_and_removed_after_success() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cache = dir.path().join("cache");
    let runner = FakeRunner::new().with_call("bin/a.sh", Script::ok().line("working"));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .cache(&cache)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(Step::new("bin/a.sh").inputs(["/in/a"]).outputs(["x"]))
        .unwrap();
    let code = with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(code, 0);
    let workdir = cache.join("test").join("0001");
    assert_eq!(runner.invocations()[0].workdir, workdir);
    assert!(!workdir.exists());

    let trace = fs::read_to_string(dir.path().join("log").join("a-0001.out")).unwrap();
    assert_eq!(trace, "working\n");
}

#[tokio::test]
async fn cache_workdir_of_malformed_step_is_kept() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cache = dir.path().join("cache");
    let runner = FakeRunner::new().with_call("a.sh", Script::ok().output("/p/1"));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .cache(&cache)
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner)).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x", "y"]))
        .unwrap();
    let result = with_timeout(monitor.wait_for_completion()).await;

    assert!(matches!(result, Err(PMonitorError::OutputMismatch { .. })));
    assert!(cache.join("test").join("0001").is_dir());
}

#[tokio::test]
async fn swd_and_wrapper_script_shape_the_command_line() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new();
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .swd(std::path::Path::new("/opt/proc"))
        .script("bin/wrap.sh")
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(
            Step::new("l2")
                .parameters(["-v"])
                .inputs(["/in/a"])
                .outputs(["x"]),
        )
        .unwrap();
    with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(
        runner.commands(),
        vec!["/opt/proc/bin/wrap.sh l2 -v /in/a x".to_string()]
    );
}

#[tokio::test]
async fn discovered_outputs_are_written_to_report() {
    init_tracing();
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new()
        .with_call("a.sh", Script::ok().line("noise").output("/p/1").output("/p/2"));
    let options = MonitorOptionsBuilder::new(dir.path())
        .inputs(&["/in/a"])
        .build();
    let monitor = PMonitor::new(options, Arc::new(runner.clone())).unwrap();

    monitor
        .execute(Step::new("a.sh").inputs(["/in/a"]).outputs(["x"]))
        .unwrap();
    monitor
        .execute(Step::new("b.sh").inputs(["x"]))
        .unwrap();
    with_timeout(monitor.wait_for_completion()).await.unwrap();

    assert_eq!(
        report_text(dir.path(), "test"),
        "a.sh  /in/a x\n#output x /p/1 /p/2\nb.sh  /p/1 /p/2 \n"
    );
    assert_eq!(runner.commands()[1], "b.sh  /p/1 /p/2 ");
}
