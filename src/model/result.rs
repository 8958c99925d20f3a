// src/model/result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{seconds_between, DataMap};
use crate::types::{FailureKind, StepStatus};

/// One materialized output file, relative to the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub media_type: String,
    pub created_at: DateTime<Utc>,
}

/// Structured description of why a step (or the whole run) failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// `None` for run-level failures such as the overall timeout.
    pub step: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: DataMap,
    pub timestamp: DateTime<Utc>,
}

impl Failure {
    pub fn new(kind: FailureKind, step: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            message: message.into(),
            data: DataMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = data;
        self
    }
}

/// What a step function hands back to the runner on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub data: DataMap,
    pub artifacts: Vec<Artifact>,
    pub provider_calls: u32,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_provider_calls(mut self, calls: u32) -> Self {
        self.provider_calls = calls;
        self
    }
}

/// Outcome of one DAG node, recorded by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: DataMap,
    pub artifacts: Vec<Artifact>,
    pub duration_s: f64,
    pub provider_calls: u32,
    pub failure: Option<Failure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(
        step_id: impl Into<String>,
        output: StepOutput,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Succeeded,
            output: output.data,
            artifacts: output.artifacts,
            duration_s: seconds_between(started_at, finished_at),
            provider_calls: output.provider_calls,
            failure: None,
            started_at,
            finished_at,
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        failure: Failure,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: DataMap::new(),
            artifacts: Vec::new(),
            duration_s: seconds_between(started_at, finished_at),
            provider_calls: 0,
            failure: Some(failure),
            started_at,
            finished_at,
        }
    }

    /// Synthetic success for a step that already succeeded in an earlier
    /// attempt of the same run. `previous` and `artifacts` are what that
    /// attempt recorded.
    pub fn resumed(
        step_id: impl Into<String>,
        previous: Option<DataMap>,
        artifacts: Vec<Artifact>,
    ) -> Self {
        let now = Utc::now();
        let mut output = previous.unwrap_or_default();
        output.insert("resumed".to_string(), Value::Bool(true));

        Self {
            step_id: step_id.into(),
            status: StepStatus::Succeeded,
            output,
            artifacts,
            duration_s: 0.0,
            provider_calls: 0,
            failure: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    /// Convenience accessor for string fields of the output map.
    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.output.get(key).and_then(Value::as_str)
    }

    pub fn was_resumed(&self) -> bool {
        self.output
            .get("resumed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
