// src/model/job.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{seconds_between, Artifact, Failure, StepResult};
use crate::types::JobStatus;

/// Immutable input to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub project: String,
    pub task_description: String,
    /// Backend-selection string, e.g. `"echo"` or `"echo:echo-2"`.
    pub backend: String,
    /// Maximum number of steps executing at the same time.
    pub concurrency: usize,
    /// Upper bound on the whole DAG run, in seconds.
    pub timeout_secs: u64,
    /// Parent directory of all run directories.
    pub output_dir: PathBuf,
}

impl JobSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Mutable record of one job run.
///
/// Created with status `running` and updated in place as step results
/// arrive; the status is finalized exactly once via [`Job::finish`].
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub steps: BTreeMap<String, StepResult>,
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<Failure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub run_dir: PathBuf,
}

impl Job {
    pub fn new(job_id: impl Into<String>, spec: JobSpec, run_dir: PathBuf) -> Self {
        Self {
            job_id: job_id.into(),
            spec,
            status: JobStatus::Running,
            steps: BTreeMap::new(),
            artifacts: Vec::new(),
            failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            run_dir,
        }
    }

    /// Store a step result, accumulating its artifacts and failure.
    ///
    /// Re-recording the same step replaces the previous result; its artifacts
    /// are not appended twice.
    pub fn record_step(&mut self, result: StepResult) {
        if let Some(previous) = self.steps.get(&result.step_id) {
            let stale: Vec<String> = previous.artifacts.iter().map(|a| a.path.clone()).collect();
            self.artifacts.retain(|a| !stale.contains(&a.path));
        }

        for artifact in &result.artifacts {
            self.artifacts.retain(|a| a.path != artifact.path);
            self.artifacts.push(artifact.clone());
        }

        if let Some(failure) = &result.failure {
            if !self.failures.contains(failure) {
                self.failures.push(failure.clone());
            }
        }

        self.steps.insert(result.step_id.clone(), result);
    }

    /// Record a failure that is not attached to a step result.
    pub fn record_failure(&mut self, failure: Failure) {
        if !self.failures.contains(&failure) {
            self.failures.push(failure);
        }
    }

    /// Finalize the job. Later calls are ignored.
    pub fn finish(&mut self, status: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Live while running, frozen once finished.
    pub fn duration_s(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        seconds_between(self.started_at, end)
    }

    pub fn succeeded_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.values().filter(|r| r.is_success())
    }
}
