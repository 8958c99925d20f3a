// src/model/mod.rs

//! Data model shared by the runner, the run manager and the orchestrator.
//!
//! - [`job`] holds the operator's [`JobSpec`] and the mutable [`Job`] record.
//! - [`result`] holds per-step records: [`StepOutput`], [`StepResult`],
//!   [`Failure`] and [`Artifact`].

pub mod job;
pub mod result;

pub use job::{Job, JobSpec};
pub use result::{Artifact, Failure, StepOutput, StepResult};

use chrono::{DateTime, Utc};

/// Arbitrary JSON object used for step outputs and free-form event/failure data.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Seconds between two instants, with millisecond precision.
pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}
