// src/orchestrator/generate.rs

//! Cached, breaker-guarded backend calls made by pipeline steps.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{BackendError, GenerationBackend, Message};
use crate::cache::{compute_cache_key, read_cache, write_cache_async, BackendConfig};
use crate::dag::StepError;
use crate::events::EventLog;
use crate::model::{Artifact, JobSpec};
use crate::run_manager::{RunManager, LOGS_DIR};
use crate::store::safe_write_async;
use crate::types::WriteMode;

/// Shared state handed to every pipeline step of one job.
pub struct PipelineContext {
    pub spec: JobSpec,
    pub run: RunManager,
    pub events: Arc<EventLog>,
    /// Fully wrapped backend (breaker over retries over the concrete client).
    pub backend: Arc<dyn GenerationBackend>,
    /// Identity of the concrete backend, as it enters cache keys.
    pub backend_config: BackendConfig,
    pub code_version: String,
}

/// Text returned by [`PipelineContext::generate`].
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub cache_key: String,
    /// Served from the cache; no backend call was made.
    pub cached: bool,
}

impl Generation {
    pub fn provider_calls(&self) -> u32 {
        if self.cached { 0 } else { 1 }
    }
}

impl PipelineContext {
    /// Generate text for `step`, consulting the run's cache first.
    ///
    /// `inputs` is everything the prompt was built from; together with the
    /// backend identity, the step id and the code version it forms the key.
    pub async fn generate(
        &self,
        step: &str,
        messages: Vec<Message>,
        inputs: &Value,
    ) -> Result<Generation, StepError> {
        let key = compute_cache_key(&self.backend_config, step, inputs, &self.code_version)?;
        let cache_dir = self.run.cache_dir();

        if let Some(entry) = read_cache(&cache_dir, &key)? {
            debug!(step = %step, key = %key, "serving response from cache");
            self.events.cache_hit(step, &key);
            return Ok(Generation {
                text: entry.response,
                cache_key: key,
                cached: true,
            });
        }
        self.events.cache_miss(step, &key);

        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        self.events
            .llm_request(step, &key, messages.len(), prompt_chars);

        let started = Instant::now();
        let result = self
            .backend
            .generate(&messages, &self.backend_config.opts)
            .await;

        let text = match result {
            Ok(text) => {
                self.events.provider_call(
                    step,
                    self.backend.name(),
                    self.backend.model(),
                    true,
                    None,
                );
                text
            }
            Err(err) => {
                if !matches!(err, BackendError::CircuitOpen { .. }) {
                    self.events.provider_call(
                        step,
                        self.backend.name(),
                        self.backend.model(),
                        false,
                        Some(&err.to_string()),
                    );
                }
                warn!(step = %step, error = %err, "generation failed");
                return Err(err.into());
            }
        };

        self.events.llm_response(
            step,
            &key,
            text.chars().count(),
            started.elapsed().as_millis(),
        );

        let outcome = write_cache_async(&cache_dir, &key, &text).await?;
        self.events.file_written(step, &outcome);

        self.write_transcript(step, &key, &messages, &text).await?;

        Ok(Generation {
            text,
            cache_key: key,
            cached: false,
        })
    }

    /// `logs/<step>.txt`: the request messages followed by the response.
    async fn write_transcript(
        &self,
        step: &str,
        key: &str,
        messages: &[Message],
        response: &str,
    ) -> Result<(), StepError> {
        let mut body = String::new();
        let _ = writeln!(body, "step: {step}");
        let _ = writeln!(
            body,
            "backend: {} ({})",
            self.backend.name(),
            self.backend.model()
        );
        let _ = writeln!(body, "cache_key: {key}");
        for message in messages {
            let _ = writeln!(body, "\n--- {} ---\n{}", message.role.as_str(), message.content);
        }
        let _ = writeln!(body, "\n--- response ---\n{response}");

        let path = self.run.run_dir().join(LOGS_DIR).join(format!("{step}.txt"));
        let outcome = safe_write_async(path, body, WriteMode::Overwrite).await?;
        self.events.file_written(step, &outcome);
        Ok(())
    }

    /// Write a step's output file and record it in the event log.
    pub async fn write_artifact(
        &self,
        step: &str,
        rel_path: &str,
        content: &str,
        media_type: &str,
    ) -> Result<Artifact, StepError> {
        let (artifact, outcome) = self
            .run
            .add_artifact(rel_path, content.as_bytes().to_vec(), media_type)
            .await?;
        self.events.file_written(step, &outcome);
        self.events.artifact_created(step, &artifact);
        Ok(artifact)
    }
}
