// src/run_manager/manifest.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Artifact, Failure, Job, JobSpec};
use crate::types::{FailureKind, JobStatus, StepStatus};

/// `manifest.json`: a point-in-time snapshot of a job, overwritten on every
/// update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub project: String,
    pub task_description: String,
    pub provider: String,
    pub status: JobStatus,
    pub duration_s: f64,
    pub files: Vec<Artifact>,
    pub steps: BTreeMap<String, StepSummary>,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub status: StepStatus,
    pub duration_s: f64,
    pub provider_calls: u32,
    pub artifacts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub kind: FailureKind,
    pub step: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Failure> for FailureSummary {
    fn from(f: &Failure) -> Self {
        Self {
            kind: f.kind,
            step: f.step.clone(),
            message: f.message.clone(),
            timestamp: f.timestamp,
        }
    }
}

impl Manifest {
    /// Manifest written when the run directory is created.
    pub fn initial(job_id: &str, spec: &JobSpec, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            started_at,
            finished_at: None,
            project: spec.project.clone(),
            task_description: spec.task_description.clone(),
            provider: spec.backend.clone(),
            status: JobStatus::Running,
            duration_s: 0.0,
            files: Vec::new(),
            steps: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn from_job(job: &Job) -> Self {
        let steps = job
            .steps
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    StepSummary {
                        status: r.status,
                        duration_s: r.duration_s,
                        provider_calls: r.provider_calls,
                        artifacts: r.artifacts.len(),
                    },
                )
            })
            .collect();

        Self {
            job_id: job.job_id.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            project: job.spec.project.clone(),
            task_description: job.spec.task_description.clone(),
            provider: job.spec.backend.clone(),
            status: job.status,
            duration_s: job.duration_s(),
            files: job.artifacts.clone(),
            steps,
            failures: job.failures.iter().map(FailureSummary::from).collect(),
        }
    }
}
