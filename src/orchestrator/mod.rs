// src/orchestrator/mod.rs

//! Job lifecycle: wires the pipeline graph to the runner, the backend stack,
//! the event log and the run directory.
//!
//! - [`steps`] holds the pipeline stages and the step registry.
//! - [`generate`] holds the per-job context and its cached generation helper.

pub mod generate;
pub mod steps;

pub use generate::{Generation, PipelineContext};
pub use steps::{StepRegistry, PIPELINE};

use std::future::{self, Future};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{from_selection, GenerationBackend, GuardedBackend, RetryingBackend};
use crate::breaker::CircuitBreaker;
use crate::cache::{code_version, BackendConfig};
use crate::config::{validate_backend_selection, ConfigFile};
use crate::dag::{Dag, DagRunner, RunError};
use crate::errors::Result;
use crate::events::EventLog;
use crate::model::{DataMap, Job, JobSpec};
use crate::run_manager::{new_job_id, RunManager};
use crate::types::{JobStatus, Level};

/// Runs jobs through the pipeline.
pub struct Orchestrator {
    config: ConfigFile,
    registry: StepRegistry,
    backend: Option<Arc<dyn GenerationBackend>>,
    code_version: Option<String>,
}

impl Orchestrator {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            registry: StepRegistry::default(),
            backend: None,
            code_version: None,
        }
    }

    /// Replace the step implementations.
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use `backend` instead of resolving the job's selection string. It is
    /// still wrapped with retries and a circuit breaker.
    pub fn with_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Pin the code version mixed into cache keys.
    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn build_dag(&self) -> Result<Dag<PipelineContext>> {
        self.registry.build_dag()
    }

    /// Start a new job.
    pub async fn run(&self, spec: JobSpec) -> Result<Job> {
        self.run_until(spec, future::pending()).await
    }

    /// Start a new job, cancelling it when `cancel` completes.
    pub async fn run_until<F>(&self, spec: JobSpec, cancel: F) -> Result<Job>
    where
        F: Future<Output = ()>,
    {
        validate_backend_selection(&spec.backend)?;
        let job_id = new_job_id(&spec.project)?;
        let run = RunManager::new(&spec.output_dir, job_id);
        run.create_structure(&spec)?;
        self.execute(spec, run, false, cancel).await
    }

    /// Re-run an existing job, skipping steps that already succeeded.
    pub async fn resume(&self, output_dir: &Path, job_id: &str) -> Result<Job> {
        self.resume_until(output_dir, job_id, future::pending()).await
    }

    pub async fn resume_until<F>(&self, output_dir: &Path, job_id: &str, cancel: F) -> Result<Job>
    where
        F: Future<Output = ()>,
    {
        let run = RunManager::open_existing(output_dir, job_id)?;
        let mut spec = run.load_job_spec()?;
        spec.output_dir = output_dir.to_path_buf();
        self.execute(spec, run, true, cancel).await
    }

    fn build_backend(&self, spec: &JobSpec) -> Result<(Arc<dyn GenerationBackend>, BackendConfig)> {
        let base = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => from_selection(&spec.backend, &self.config.backend.model)?,
        };

        let backend_config = BackendConfig {
            name: base.name().to_string(),
            model: base.model().to_string(),
            opts: self.config.backend.opts.clone(),
        };

        let breaker = CircuitBreaker::new(
            base.name(),
            self.config.breaker.threshold,
            self.config.breaker.cooldown(),
        );
        let retrying = RetryingBackend::new(
            base,
            self.config.retry.max_attempts,
            self.config.retry.base_delay(),
        );
        let guarded = GuardedBackend::new(Arc::new(retrying), breaker);

        Ok((Arc::new(guarded), backend_config))
    }

    async fn execute<F>(&self, spec: JobSpec, run: RunManager, resume: bool, cancel: F) -> Result<Job>
    where
        F: Future<Output = ()>,
    {
        let dag = self.build_dag()?;
        let (backend, backend_config) = self.build_backend(&spec)?;
        let events = Arc::new(EventLog::open(run.events_path(), run.job_id())?);

        let mut job = Job::new(run.job_id(), spec.clone(), run.run_dir().to_path_buf());
        info!(
            job_id = %job.job_id,
            project = %spec.project,
            backend = %backend_config.name,
            model = %backend_config.model,
            resume,
            "job started"
        );
        events.job_started(&spec, resume);

        let ctx = Arc::new(PipelineContext {
            spec: spec.clone(),
            run: run.clone(),
            events: Arc::clone(&events),
            backend,
            backend_config,
            code_version: self
                .code_version
                .clone()
                .unwrap_or_else(|| code_version().to_string()),
        });

        let runner = DagRunner::new(spec.concurrency, Arc::clone(&events))
            .with_timeout(Some(spec.timeout()))
            .with_resume(resume);

        match runner.run_until(&dag, ctx, cancel).await {
            Ok(results) => {
                for result in results.into_values() {
                    job.record_step(result);
                }
                job.finish(JobStatus::Succeeded);
                events.job_succeeded(job.duration_s(), job.steps.len());
                info!(job_id = %job.job_id, duration_s = job.duration_s(), "job succeeded");
            }
            Err(RunError::Cancelled { results }) => {
                for result in results.into_values() {
                    job.record_step(result);
                }
                job.finish(JobStatus::Cancelled);
                let mut data = DataMap::new();
                data.insert("cancelled".to_string(), Value::Bool(true));
                events.job_failed(Level::Warn, "job cancelled", data);
                warn!(job_id = %job.job_id, steps = job.steps.len(), "job cancelled");
            }
            Err(err) => self.fail_job(&mut job, &events, err),
        }

        run.update_manifest(&job)?;
        events.close()?;
        Ok(job)
    }

    fn fail_job(&self, job: &mut Job, events: &EventLog, err: RunError) {
        let failure = err.to_failure();
        let message = err.to_string();

        for result in err.into_partial_results().into_values() {
            job.record_step(result);
        }
        job.record_failure(failure.clone());
        job.finish(JobStatus::Failed);

        let mut data = DataMap::new();
        data.insert("kind".to_string(), Value::from(failure.kind.as_str()));
        if let Some(step) = &failure.step {
            data.insert("step".to_string(), Value::from(step.as_str()));
        }
        events.job_failed(Level::Error, &message, data);
        warn!(job_id = %job.job_id, kind = %failure.kind, error = %message, "job failed");
    }
}
