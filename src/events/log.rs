// src/events/log.rs

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{Result, StepdagError};
use crate::events::event::{Event, EventType};
use crate::model::{Artifact, DataMap, Failure, JobSpec, StepResult};
use crate::store::WriteOutcome;
use crate::types::Level;

/// File name of the event log inside a run directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Append-only ND-JSON writer for one job.
///
/// Every emission is serialized to a single line and flushed before
/// returning. The typed helpers never fail the caller: a write error is
/// reported through `tracing` and the engine keeps going.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    job_id: String,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl EventLog {
    /// Open (or create) the log at `path` in append mode.
    ///
    /// A final line left without its newline by a crash is completed if it
    /// parses, and cut off otherwise, so new events always start a line.
    pub fn open(path: impl Into<PathBuf>, job_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        repair_tail(&path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened event log");

        Ok(Self {
            path,
            job_id: job_id.into(),
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append one event and flush it to disk.
    pub fn emit(
        &self,
        level: Level,
        event_type: EventType,
        step: Option<&str>,
        data: Option<DataMap>,
    ) -> Result<Event> {
        let mut event = Event::new(self.job_id.clone(), level, event_type);
        event.step = step.map(str::to_string);
        event.data = data;

        let line = serde_json::to_string(&event)?;

        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let writer = guard.as_mut().ok_or_else(|| {
            StepdagError::IoError(io::Error::other(format!(
                "event log {} is closed",
                self.path.display()
            )))
        })?;
        writeln!(writer, "{line}")?;
        writer.flush()?;

        Ok(event)
    }

    /// Flush and release the file handle. Later emissions fail.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!(path = %self.path.display(), "closed event log");
        }
        Ok(())
    }

    fn record(&self, level: Level, event_type: EventType, step: Option<&str>, data: Value) {
        if let Err(e) = self.emit(level, event_type, step, into_map(data)) {
            warn!(
                job_id = %self.job_id,
                event = %event_type,
                error = %e,
                "failed to append event"
            );
        }
    }

    pub fn job_started(&self, spec: &JobSpec, resume: bool) {
        self.record(
            Level::Info,
            EventType::JobStarted,
            None,
            json!({
                "project": spec.project,
                "task_description": spec.task_description,
                "provider": spec.backend,
                "concurrency": spec.concurrency,
                "timeout_s": spec.timeout_secs,
                "resume": resume,
            }),
        );
    }

    pub fn job_succeeded(&self, duration_s: f64, steps: usize) {
        self.record(
            Level::Info,
            EventType::JobSucceeded,
            None,
            json!({ "duration_s": duration_s, "steps": steps }),
        );
    }

    pub fn job_failed(&self, level: Level, message: &str, extra: DataMap) {
        let mut data = extra;
        data.insert("message".to_string(), Value::from(message));
        self.record(level, EventType::JobFailed, None, Value::Object(data));
    }

    pub fn step_started(&self, step: &str, deps: &[String]) {
        self.record(
            Level::Info,
            EventType::StepStarted,
            Some(step),
            json!({ "deps": deps }),
        );
    }

    pub fn step_succeeded(&self, result: &StepResult) {
        self.record(
            Level::Info,
            EventType::StepSucceeded,
            Some(&result.step_id),
            json!({
                "duration_s": result.duration_s,
                "provider_calls": result.provider_calls,
                "artifacts": result.artifacts.len(),
                "files": result.artifacts,
                "output": result.output,
            }),
        );
    }

    pub fn step_failed(&self, step: &str, failure: &Failure) {
        self.record(
            Level::Error,
            EventType::StepFailed,
            Some(step),
            json!({
                "kind": failure.kind,
                "message": failure.message,
                "data": failure.data,
            }),
        );
    }

    pub fn step_skipped(&self, step: &str, reason: &str) {
        self.record(
            Level::Info,
            EventType::StepSkipped,
            Some(step),
            json!({ "reason": reason }),
        );
    }

    pub fn provider_call(&self, step: &str, backend: &str, model: &str, ok: bool, error: Option<&str>) {
        let level = if ok { Level::Info } else { Level::Warn };
        self.record(
            level,
            EventType::ProviderCall,
            Some(step),
            json!({ "backend": backend, "model": model, "ok": ok, "error": error }),
        );
    }

    pub fn llm_request(&self, step: &str, key: &str, messages: usize, prompt_chars: usize) {
        self.record(
            Level::Info,
            EventType::LlmRequest,
            Some(step),
            json!({ "cache_key": key, "messages": messages, "prompt_chars": prompt_chars }),
        );
    }

    pub fn llm_response(&self, step: &str, key: &str, response_chars: usize, elapsed_ms: u128) {
        self.record(
            Level::Info,
            EventType::LlmResponse,
            Some(step),
            json!({ "cache_key": key, "response_chars": response_chars, "elapsed_ms": elapsed_ms }),
        );
    }

    pub fn artifact_created(&self, step: &str, artifact: &Artifact) {
        self.record(
            Level::Info,
            EventType::ArtifactCreated,
            Some(step),
            json!({
                "path": artifact.path,
                "sha256": artifact.sha256,
                "size_bytes": artifact.size_bytes,
                "media_type": artifact.media_type,
            }),
        );
    }

    pub fn file_written(&self, step: &str, outcome: &WriteOutcome) {
        self.record(
            Level::Info,
            EventType::FileWritten,
            Some(step),
            json!({
                "path": outcome.path.display().to_string(),
                "sha256": outcome.sha256,
                "size_bytes": outcome.size_bytes,
                "wrote": outcome.wrote,
                "reason": outcome.reason,
            }),
        );
    }

    pub fn cache_hit(&self, step: &str, key: &str) {
        self.record(Level::Info, EventType::CacheHit, Some(step), json!({ "cache_key": key }));
    }

    pub fn cache_miss(&self, step: &str, key: &str) {
        self.record(Level::Info, EventType::CacheMiss, Some(step), json!({ "cache_key": key }));
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn repair_tail(path: &Path) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if bytes.last().is_none_or(|b| *b == b'\n') {
        return Ok(());
    }

    let line_start = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    let tail = &bytes[line_start..];
    if serde_json::from_slice::<Event>(tail).is_ok() {
        debug!(path = %path.display(), "terminating unterminated final event");
        OpenOptions::new().append(true).open(path)?.write_all(b"\n")?;
    } else {
        warn!(
            path = %path.display(),
            dropped_bytes = tail.len(),
            "dropping torn final event line"
        );
        OpenOptions::new().write(true).open(path)?.set_len(line_start as u64)?;
    }
    Ok(())
}

fn into_map(value: Value) -> Option<DataMap> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parse a whole event log back into an ordered list.
///
/// A missing file yields an empty list. A torn final line (from a crash
/// mid-write) is skipped; malformed lines anywhere else are an error.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<io::Result<_>>()?;
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    let mut events = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) if Some(idx) == last => {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "ignoring truncated trailing event"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(events)
}

/// Conjunctive filter: every provided criterion must match.
pub fn filter_events(
    events: &[Event],
    event_type: Option<&str>,
    step: Option<&str>,
    level: Option<Level>,
) -> Vec<Event> {
    events
        .iter()
        .filter(|e| event_type.is_none_or(|t| e.event_type == t))
        .filter(|e| step.is_none_or(|s| e.step.as_deref() == Some(s)))
        .filter(|e| level.is_none_or(|l| e.level == l))
        .cloned()
        .collect()
}

/// What an earlier attempt recorded for a step that succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorSuccess {
    pub output: Option<DataMap>,
    pub artifacts: Vec<Artifact>,
}

/// Steps with a recorded `step.succeeded` event, with the output map and
/// artifacts recorded alongside it. Later events for the same step win.
///
/// Artifacts come from the event's `files` list; when it is absent they are
/// rebuilt from the step's `artifact.created` events.
pub fn prior_successes(events: &[Event]) -> HashMap<String, PriorSuccess> {
    let mut created: HashMap<&str, Vec<Artifact>> = HashMap::new();
    let mut out = HashMap::new();

    for event in events {
        let Some(step) = event.step.as_deref() else {
            continue;
        };

        if event.is(EventType::ArtifactCreated) {
            if let Some(artifact) = artifact_from_event(event) {
                let list = created.entry(step).or_default();
                list.retain(|a| a.path != artifact.path);
                list.push(artifact);
            }
        } else if event.is(EventType::StepSucceeded) {
            let data = event.data.as_ref();
            let output = data
                .and_then(|d| d.get("output"))
                .and_then(Value::as_object)
                .cloned();
            let artifacts = match data.and_then(|d| d.get("files")) {
                Some(files) => serde_json::from_value(files.clone()).unwrap_or_default(),
                None => created.get(step).cloned().unwrap_or_default(),
            };
            out.insert(step.to_string(), PriorSuccess { output, artifacts });
        }
    }
    out
}

fn artifact_from_event(event: &Event) -> Option<Artifact> {
    let data = event.data.as_ref()?;
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
    Some(Artifact {
        path: text("path")?,
        sha256: text("sha256")?,
        size_bytes: data.get("size_bytes").and_then(Value::as_u64)?,
        media_type: text("media_type").unwrap_or_default(),
        created_at: event.ts,
    })
}
