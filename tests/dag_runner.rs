// tests/dag_runner.rs

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use stepdag::backend::BackendError;
use stepdag::dag::{Dag, DagNode, DagRunner, DependencyResults, RunError, Step, StepError};
use stepdag::events::{read_events, EventLog, EventType};
use stepdag::model::StepOutput;
use stepdag::types::{FailureKind, StepStatus};
use stepdag_test_utils::builders::dag_from_edges;
use stepdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn open_log(dir: &TempDir) -> Result<Arc<EventLog>, Box<dyn Error>> {
    Ok(Arc::new(EventLog::open(
        dir.path().join("events.jsonl"),
        "job-test",
    )?))
}

/// A step that sleeps for `ms` and then succeeds.
fn sleeper(ms: u64) -> impl Step<()> {
    move |_ctx: Arc<()>, _deps: DependencyResults| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, StepError>(StepOutput::new().with("slept_ms", ms))
    }
}

#[tokio::test]
async fn diamond_runs_every_step_and_passes_dependency_results() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;
    let dag: Dag<()> =
        dag_from_edges(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);

    let results = with_timeout(DagRunner::new(2, Arc::clone(&events)).run(&dag, Arc::new(())))
        .await?;

    assert_eq!(results.len(), 4);
    assert!(results.values().all(|r| r.status == StepStatus::Succeeded));

    let d = &results["d"];
    assert_eq!(
        d.output.get("deps"),
        Some(&Value::from(vec!["b", "c"])),
        "d should receive exactly its direct dependencies"
    );
    assert_eq!(results["a"].output.get("deps"), Some(&Value::from(Vec::<String>::new())));

    events.close()?;
    let log = read_events(dir.path().join("events.jsonl"))?;
    let started = log.iter().filter(|e| e.is(EventType::StepStarted)).count();
    let succeeded = log.iter().filter(|e| e.is(EventType::StepSucceeded)).count();
    assert_eq!(started, 4);
    assert_eq!(succeeded, 4);
    Ok(())
}

#[derive(Default)]
struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[tokio::test]
async fn concurrency_limit_bounds_parallel_steps() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<Probe> = Dag::new();
    for i in 0..8 {
        let step = |ctx: Arc<Probe>, _deps: DependencyResults| async move {
            let now = ctx.running.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            ctx.running.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, StepError>(StepOutput::new())
        };
        dag.add_node(DagNode::new(format!("n{i}"), step, Vec::<String>::new(), "probe"))?;
    }

    let probe = Arc::new(Probe::default());
    let results = with_timeout(DagRunner::new(3, events).run(&dag, Arc::clone(&probe))).await?;

    assert_eq!(results.len(), 8);
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "observed {peak} steps running at once");
    assert_eq!(peak, 3);
    Ok(())
}

#[derive(Default)]
struct Flags {
    sibling_finished: AtomicBool,
    dependent_ran: AtomicBool,
}

#[tokio::test]
async fn failing_step_lets_siblings_finish_then_aborts() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<Flags> = Dag::new();
    dag.add_node(DagNode::new(
        "broken",
        |_ctx: Arc<Flags>, _deps: DependencyResults| async move {
            Err::<StepOutput, _>(StepError::validation("bad input").with_data("field", "task"))
        },
        Vec::<String>::new(),
        "fails at once",
    ))?;
    dag.add_node(DagNode::new(
        "slow",
        |ctx: Arc<Flags>, _deps: DependencyResults| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ctx.sibling_finished.store(true, Ordering::SeqCst);
            Ok::<_, StepError>(StepOutput::new().with("done", true))
        },
        Vec::<String>::new(),
        "slow sibling",
    ))?;
    dag.add_node(DagNode::new(
        "after",
        |ctx: Arc<Flags>, _deps: DependencyResults| async move {
            ctx.dependent_ran.store(true, Ordering::SeqCst);
            Ok::<_, StepError>(StepOutput::new())
        },
        vec!["broken", "slow"],
        "never reached",
    ))?;

    let flags = Arc::new(Flags::default());
    let err = with_timeout(DagRunner::new(4, Arc::clone(&events)).run(&dag, Arc::clone(&flags)))
        .await
        .expect_err("run should fail");

    assert!(flags.sibling_finished.load(Ordering::SeqCst));
    assert!(!flags.dependent_ran.load(Ordering::SeqCst));

    let failure = err.to_failure();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.step.as_deref(), Some("broken"));
    assert_eq!(failure.data.get("field"), Some(&Value::from("task")));

    let results = err.into_partial_results();
    assert_eq!(results["slow"].status, StepStatus::Succeeded);
    assert_eq!(results["broken"].status, StepStatus::Failed);
    assert!(!results.contains_key("after"));

    events.close()?;
    let log = read_events(dir.path().join("events.jsonl"))?;
    let failed: Vec<_> = log.iter().filter(|e| e.is(EventType::StepFailed)).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].step.as_deref(), Some("broken"));
    assert!(
        !log.iter()
            .any(|e| e.is(EventType::StepStarted) && e.step.as_deref() == Some("after"))
    );
    Ok(())
}

#[tokio::test]
async fn first_failure_in_node_order_is_reported() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<()> = Dag::new();
    dag.add_node(DagNode::new(
        "first",
        |_ctx: Arc<()>, _deps: DependencyResults| async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Err::<StepOutput, _>(StepError::tool("first broke"))
        },
        Vec::<String>::new(),
        "slow failure",
    ))?;
    dag.add_node(DagNode::new(
        "second",
        |_ctx: Arc<()>, _deps: DependencyResults| async move {
            Err::<StepOutput, _>(StepError::provider("second broke"))
        },
        Vec::<String>::new(),
        "fast failure",
    ))?;

    let err = with_timeout(DagRunner::new(2, events).run(&dag, Arc::new(())))
        .await
        .expect_err("run should fail");

    let failure = err.to_failure();
    assert_eq!(failure.step.as_deref(), Some("first"));
    assert_eq!(failure.kind, FailureKind::Tool);
    let results = err.partial_results().ok_or("partial results missing")?;
    assert_eq!(results.len(), 2);
    Ok(())
}

#[tokio::test]
async fn overall_timeout_returns_partial_results() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<()> = Dag::new();
    dag.add_node(DagNode::new("fast", sleeper(1), Vec::<String>::new(), "fast"))?;
    dag.add_node(DagNode::new("slow", sleeper(5_000), vec!["fast"], "slow"))?;

    let runner = DagRunner::new(2, events).with_timeout(Some(Duration::from_millis(150)));
    let err = with_timeout(runner.run(&dag, Arc::new(())))
        .await
        .expect_err("run should time out");

    assert!(matches!(err, RunError::Timeout { .. }), "got {err:?}");
    let failure = err.to_failure();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.step, None);

    let results = err.into_partial_results();
    assert!(results["fast"].is_success());
    assert!(!results.contains_key("slow"));
    Ok(())
}

#[tokio::test]
async fn cancel_signal_keeps_results_of_finished_waves() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<()> = Dag::new();
    dag.add_node(DagNode::new("fast", sleeper(1), Vec::<String>::new(), "fast"))?;
    dag.add_node(DagNode::new("slow", sleeper(5_000), vec!["fast"], "slow"))?;

    let runner = DagRunner::new(2, Arc::clone(&events));
    let err = with_timeout(runner.run_until(
        &dag,
        Arc::new(()),
        tokio::time::sleep(Duration::from_millis(150)),
    ))
    .await
    .expect_err("run should be cancelled");

    assert!(matches!(err, RunError::Cancelled { .. }), "got {err:?}");
    assert_eq!(err.to_failure().step, None);
    let results = err.into_partial_results();
    assert_eq!(results.len(), 1);
    assert!(results["fast"].is_success());

    let logged = read_events(events.path())?;
    assert!(logged
        .iter()
        .any(|e| e.is(EventType::StepSucceeded) && e.step.as_deref() == Some("fast")));
    Ok(())
}

#[tokio::test]
async fn panicking_step_is_a_provider_failure() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;

    let mut dag: Dag<()> = Dag::new();
    dag.add_node(DagNode::new(
        "boom",
        |_ctx: Arc<()>, _deps: DependencyResults| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<_, StepError>(StepOutput::new())
        },
        Vec::<String>::new(),
        "panics",
    ))?;

    let err = with_timeout(DagRunner::new(1, Arc::clone(&events)).run(&dag, Arc::new(())))
        .await
        .expect_err("run should fail");

    let failure = err.to_failure();
    assert_eq!(failure.kind, FailureKind::Provider);
    assert_eq!(failure.step.as_deref(), Some("boom"));
    assert!(failure.message.contains("kaboom"), "message: {}", failure.message);

    events.close()?;
    let log = read_events(dir.path().join("events.jsonl"))?;
    assert!(log.iter().any(|e| e.is(EventType::StepFailed)));
    Ok(())
}

#[tokio::test]
async fn backend_errors_keep_their_failure_kind() -> TestResult {
    init_tracing();

    let cases = [
        (
            BackendError::CircuitOpen {
                backend: "fake".to_string(),
                retry_in: Duration::from_secs(3),
            },
            FailureKind::CircuitBreaker,
        ),
        (BackendError::Timeout("slow".to_string()), FailureKind::Timeout),
        (BackendError::Auth("no key".to_string()), FailureKind::Provider),
    ];

    for (backend_err, expected) in cases {
        let dir = tempfile::tempdir()?;
        let events = open_log(&dir)?;
        let mut dag: Dag<()> = Dag::new();
        dag.add_node(DagNode::new(
            "call",
            move |_ctx: Arc<()>, _deps: DependencyResults| {
                let err = backend_err.clone();
                async move { Err::<StepOutput, StepError>(err.into()) }
            },
            Vec::<String>::new(),
            "calls a backend",
        ))?;

        let err = with_timeout(DagRunner::new(1, events).run(&dag, Arc::new(())))
            .await
            .expect_err("run should fail");
        assert_eq!(err.to_failure().kind, expected);
    }
    Ok(())
}

#[tokio::test]
async fn invalid_graph_is_rejected_before_running() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events = open_log(&dir)?;
    let dag: Dag<()> = dag_from_edges(&[("a", &["b"]), ("b", &["a"])]);

    let err = DagRunner::new(1, Arc::clone(&events))
        .run(&dag, Arc::new(()))
        .await
        .expect_err("cycle must be rejected");

    assert!(matches!(err, RunError::Dag(_)));
    assert_eq!(err.to_failure().kind, FailureKind::Validation);

    events.close()?;
    assert!(read_events(dir.path().join("events.jsonl"))?.is_empty());
    Ok(())
}
