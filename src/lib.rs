// src/lib.rs

pub mod backend;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod run_manager;
pub mod store;
pub mod types;

use std::process::ExitCode;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, EventsArgs, ResumeArgs, RunArgs};
use crate::config::{load_or_default, validate_backend_selection, ConfigFile};
use crate::errors::StepdagError;
use crate::events::{filter_events, read_events};
use crate::model::{Job, JobSpec};
use crate::orchestrator::Orchestrator;
use crate::run_manager::RunManager;
use crate::types::{JobStatus, Level};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, then dispatches to `run`, `resume` or `events`. Ctrl-C
/// during a job cancels it and still writes the final manifest.
pub async fn run(args: CliArgs) -> Result<ExitCode> {
    let cfg = load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Run(run_args) => run_job(cfg, run_args).await,
        Command::Resume(resume_args) => resume_job(cfg, resume_args).await,
        Command::Events(events_args) => {
            print_events(&cfg, &events_args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Merge CLI overrides over the `[job]` section and check the result.
pub fn build_job_spec(cfg: &ConfigFile, args: &RunArgs) -> errors::Result<JobSpec> {
    let spec = JobSpec {
        project: args.project.clone().unwrap_or_else(|| cfg.job.project.clone()),
        task_description: args.task.clone(),
        backend: args.backend.clone().unwrap_or_else(|| cfg.job.backend.clone()),
        concurrency: args.concurrency.unwrap_or(cfg.job.concurrency),
        timeout_secs: args.timeout_secs.unwrap_or(cfg.job.timeout_secs),
        output_dir: args
            .output_dir
            .clone()
            .unwrap_or_else(|| cfg.job.output_dir.clone()),
    };

    if spec.task_description.trim().is_empty() {
        return Err(StepdagError::ConfigError(
            "--task must not be empty".to_string(),
        ));
    }
    if spec.concurrency == 0 {
        return Err(StepdagError::ConfigError(
            "--concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if spec.timeout_secs == 0 {
        return Err(StepdagError::ConfigError(
            "--timeout-secs must be > 0 (got 0)".to_string(),
        ));
    }
    validate_backend_selection(&spec.backend)?;

    Ok(spec)
}

async fn run_job(cfg: ConfigFile, args: RunArgs) -> Result<ExitCode> {
    let spec = build_job_spec(&cfg, &args)?;
    let orchestrator = Orchestrator::new(cfg);

    if args.dry_run {
        print_dry_run(&orchestrator, &spec)?;
        return Ok(ExitCode::SUCCESS);
    }

    let job = orchestrator.run_until(spec, ctrl_c()).await?;
    Ok(report(&job))
}

async fn resume_job(cfg: ConfigFile, args: ResumeArgs) -> Result<ExitCode> {
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| cfg.job.output_dir.clone());
    let orchestrator = Orchestrator::new(cfg);

    let job = orchestrator
        .resume_until(&output_dir, &args.job_id, ctrl_c())
        .await?;
    Ok(report(&job))
}

/// Completes on Ctrl-C. If the signal handler cannot be installed the job
/// simply runs without cancellation.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received; cancelling job");
}

fn report(job: &Job) -> ExitCode {
    println!("job {} {}", job.job_id, job.status);
    println!("  run dir:  {}", job.run_dir.display());
    println!("  duration: {:.3}s", job.duration_s());
    for (id, result) in &job.steps {
        let note = if result.was_resumed() { " (resumed)" } else { "" };
        println!(
            "  - {id}: {} in {:.3}s, {} provider call(s){note}",
            result.status.as_str(),
            result.duration_s,
            result.provider_calls
        );
    }
    for failure in &job.failures {
        println!(
            "  ! {} [{}]: {}",
            failure.step.as_deref().unwrap_or("<run>"),
            failure.kind,
            failure.message
        );
    }

    if job.status == JobStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print the pipeline's topological order and its DOT rendering.
fn print_dry_run(orchestrator: &Orchestrator, spec: &JobSpec) -> Result<()> {
    let dag = orchestrator.build_dag()?;
    let order = dag.topological_sort()?;

    println!("stepdag dry-run");
    println!("  project:     {}", spec.project);
    println!("  backend:     {}", spec.backend);
    println!("  concurrency: {}", spec.concurrency);
    println!("  timeout:     {}s", spec.timeout_secs);
    println!("  output dir:  {}", spec.output_dir.display());
    println!();

    println!("steps ({}):", order.len());
    for id in &order {
        if let Some(node) = dag.get(id) {
            println!("  - {id}: {}", node.description);
            if !node.deps.is_empty() {
                println!("      after: {:?}", node.deps);
            }
        }
    }
    println!();
    println!("{}", dag.to_dot());

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_events(cfg: &ConfigFile, args: &EventsArgs) -> Result<()> {
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| cfg.job.output_dir.clone());
    let run = RunManager::open_existing(&output_dir, &args.job_id)?;

    let level = args
        .level
        .as_deref()
        .map(|s| s.parse::<Level>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let events = read_events(run.events_path())?;
    let selected = filter_events(
        &events,
        args.event_type.as_deref(),
        args.step.as_deref(),
        level,
    );

    for event in &selected {
        println!("{}", serde_json::to_string(event)?);
    }
    debug!(total = events.len(), shown = selected.len(), "printed events");
    Ok(())
}
