use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stepdag::backend::{BackendError, GenerationBackend, Message, Role};
use stepdag::model::DataMap;

/// A fake generation backend that:
/// - records every request it receives
/// - replies from a scripted queue, then falls back to a canned response
///   derived from the prompt (or to a permanent error, if one is set).
pub struct FakeBackend {
    name: String,
    model: String,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    always_fail: Mutex<Option<BackendError>>,
    delay: Option<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            name: "fake".to_string(),
            model: "fake-1".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Mutex::new(VecDeque::new()),
            always_fail: Mutex::new(None),
            delay: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the outcome of the next unscripted call.
    pub fn push(&self, outcome: Result<String, BackendError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Fail every call that has no scripted outcome.
    pub fn fail_always(&self, err: BackendError) {
        *self.always_fail.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.always_fail.lock().unwrap() = None;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose user message mentions `needle`.
    pub fn calls_mentioning(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|msgs| {
                msgs.iter()
                    .any(|m| m.role == Role::User && m.content.contains(needle))
            })
            .count()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        _options: &DataMap,
    ) -> Result<String, BackendError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(outcome) = scripted {
            return outcome;
        }
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        Ok(format!("fake response #{n} to: {prompt}"))
    }
}
