// src/events/event.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DataMap;
use crate::types::Level;

/// Canonical event types. The string forms are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    JobStarted,
    JobSucceeded,
    JobFailed,
    StepStarted,
    StepSucceeded,
    StepFailed,
    StepSkipped,
    ProviderCall,
    LlmRequest,
    LlmResponse,
    ArtifactCreated,
    FileWritten,
    CacheHit,
    CacheMiss,
}

impl EventType {
    pub const ALL: [EventType; 14] = [
        EventType::JobStarted,
        EventType::JobSucceeded,
        EventType::JobFailed,
        EventType::StepStarted,
        EventType::StepSucceeded,
        EventType::StepFailed,
        EventType::StepSkipped,
        EventType::ProviderCall,
        EventType::LlmRequest,
        EventType::LlmResponse,
        EventType::ArtifactCreated,
        EventType::FileWritten,
        EventType::CacheHit,
        EventType::CacheMiss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobStarted => "job.started",
            EventType::JobSucceeded => "job.succeeded",
            EventType::JobFailed => "job.failed",
            EventType::StepStarted => "step.started",
            EventType::StepSucceeded => "step.succeeded",
            EventType::StepFailed => "step.failed",
            EventType::StepSkipped => "step.skipped",
            EventType::ProviderCall => "provider.call",
            EventType::LlmRequest => "llm.request",
            EventType::LlmResponse => "llm.response",
            EventType::ArtifactCreated => "artifact.created",
            EventType::FileWritten => "file.written",
            EventType::CacheHit => "cache.hit",
            EventType::CacheMiss => "cache.miss",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// One line of `events.jsonl`.
///
/// `type` is kept as a plain string so that logs written by newer versions
/// (with event types this build does not know) still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub job_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
}

impl Event {
    pub fn new(job_id: impl Into<String>, level: Level, event_type: EventType) -> Self {
        Self {
            ts: Utc::now(),
            level,
            job_id: job_id.into(),
            event_type: event_type.as_str().to_string(),
            step: None,
            data: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is(&self, event_type: EventType) -> bool {
        self.event_type == event_type.as_str()
    }
}
