// tests/runner_resume.rs

use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use stepdag::dag::{Dag, DagNode, DagRunner, DependencyResults, StepError};
use stepdag::events::{filter_events, read_events, EventLog, EventType};
use stepdag::model::{DataMap, StepOutput};
use stepdag::types::{FailureKind, Level};
use stepdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[derive(Default)]
struct Counters {
    architect: AtomicUsize,
    builder: AtomicUsize,
    builder_should_fail: AtomicBool,
}

/// architect -> builder. The builder fails while `builder_should_fail` is set.
fn two_step_dag() -> Result<Dag<Counters>, Box<dyn Error>> {
    let mut dag = Dag::new();
    dag.add_node(DagNode::new(
        "architect",
        |ctx: Arc<Counters>, _deps: DependencyResults| async move {
            ctx.architect.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StepError>(StepOutput::new().with("text", "the plan"))
        },
        Vec::<String>::new(),
        "plan",
    ))?;
    dag.add_node(DagNode::new(
        "builder",
        |ctx: Arc<Counters>, deps: DependencyResults| async move {
            ctx.builder.fetch_add(1, Ordering::SeqCst);
            if ctx.builder_should_fail.load(Ordering::SeqCst) {
                return Err(StepError::provider("backend unavailable"));
            }
            let plan = deps
                .get("architect")
                .and_then(|r| r.output_str("text"))
                .unwrap_or("<none>")
                .to_string();
            Ok(StepOutput::new().with("built_from", plan))
        },
        vec!["architect"],
        "build",
    ))?;
    Ok(dag)
}

async fn run_once(
    events_path: &Path,
    dag: &Dag<Counters>,
    counters: &Arc<Counters>,
    resume: bool,
) -> Result<Result<stepdag::dag::RunResults, stepdag::dag::RunError>, Box<dyn Error>> {
    let events = Arc::new(EventLog::open(events_path, "job-resume")?);
    let outcome = with_timeout(
        DagRunner::new(2, Arc::clone(&events))
            .with_resume(resume)
            .run(dag, Arc::clone(counters)),
    )
    .await;
    events.close()?;
    Ok(outcome)
}

#[tokio::test]
async fn resume_skips_succeeded_steps_and_retries_failed_ones() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events_path = dir.path().join("events.jsonl");
    let dag = two_step_dag()?;
    let counters = Arc::new(Counters::default());

    counters.builder_should_fail.store(true, Ordering::SeqCst);
    let first = run_once(&events_path, &dag, &counters, false).await?;
    let err = first.expect_err("builder should fail on the first attempt");
    assert_eq!(err.to_failure().kind, FailureKind::Provider);
    assert_eq!(counters.architect.load(Ordering::SeqCst), 1);
    assert_eq!(counters.builder.load(Ordering::SeqCst), 1);

    counters.builder_should_fail.store(false, Ordering::SeqCst);
    let results = run_once(&events_path, &dag, &counters, true).await??;

    // architect is not invoked again, builder is.
    assert_eq!(counters.architect.load(Ordering::SeqCst), 1);
    assert_eq!(counters.builder.load(Ordering::SeqCst), 2);

    let architect = &results["architect"];
    assert!(architect.is_success());
    assert!(architect.was_resumed());
    assert_eq!(architect.output_str("text"), Some("the plan"));
    assert_eq!(architect.provider_calls, 0);

    let builder = &results["builder"];
    assert!(builder.is_success());
    assert!(!builder.was_resumed());
    assert_eq!(builder.output_str("built_from"), Some("the plan"));

    let log = read_events(&events_path)?;
    let skipped = filter_events(&log, Some("step.skipped"), Some("architect"), None);
    assert_eq!(skipped.len(), 1);
    let failed = filter_events(&log, Some("step.failed"), Some("builder"), Some(Level::Error));
    assert_eq!(failed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn hand_written_log_with_one_success_resumes_only_that_step() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events_path = dir.path().join("events.jsonl");

    {
        let log = EventLog::open(&events_path, "job-resume")?;
        let mut data = DataMap::new();
        data.insert("output".to_string(), json!({ "text": "recorded plan" }));
        log.emit(Level::Info, EventType::StepSucceeded, Some("architect"), Some(data))?;
        log.close()?;
    }

    let dag = two_step_dag()?;
    let counters = Arc::new(Counters::default());
    let results = run_once(&events_path, &dag, &counters, true).await??;

    assert_eq!(counters.architect.load(Ordering::SeqCst), 0);
    assert_eq!(counters.builder.load(Ordering::SeqCst), 1);
    assert_eq!(results["architect"].output.get("resumed"), Some(&json!(true)));
    assert_eq!(results["builder"].output_str("built_from"), Some("recorded plan"));
    Ok(())
}

#[tokio::test]
async fn failed_event_does_not_suppress_reexecution() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events_path = dir.path().join("events.jsonl");

    {
        let log = EventLog::open(&events_path, "job-resume")?;
        log.emit(Level::Info, EventType::StepStarted, Some("architect"), None)?;
        log.emit(Level::Error, EventType::StepFailed, Some("architect"), None)?;
        log.close()?;
    }

    let dag = two_step_dag()?;
    let counters = Arc::new(Counters::default());
    let results = run_once(&events_path, &dag, &counters, true).await??;

    assert_eq!(counters.architect.load(Ordering::SeqCst), 1);
    assert_eq!(counters.builder.load(Ordering::SeqCst), 1);
    assert!(!results["architect"].was_resumed());
    Ok(())
}

#[tokio::test]
async fn resume_without_a_log_runs_everything() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let events_path = dir.path().join("nested").join("events.jsonl");

    let dag = two_step_dag()?;
    let counters = Arc::new(Counters::default());
    let results = run_once(&events_path, &dag, &counters, true).await??;

    assert_eq!(results.len(), 2);
    assert_eq!(counters.architect.load(Ordering::SeqCst), 1);
    assert!(results.values().all(|r| !r.was_resumed()));
    Ok(())
}
