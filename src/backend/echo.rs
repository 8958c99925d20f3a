// src/backend/echo.rs

//! Offline backend that answers every request with a stable rendering of it.
//! Same messages and options always give the same text.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::backend::{BackendError, GenerationBackend, Message, Role};
use crate::model::DataMap;
use crate::store::sha256_hex;

pub const DEFAULT_ECHO_MODEL: &str = "echo-1";

#[derive(Debug, Clone)]
pub struct EchoBackend {
    model: String,
}

impl EchoBackend {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            model: if model.is_empty() {
                DEFAULT_ECHO_MODEL.to_string()
            } else {
                model
            },
        }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_MODEL)
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &DataMap,
    ) -> Result<String, BackendError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| BackendError::Provider("request has no user message".to_string()))?;

        let request = serde_json::to_vec(&json!({ "messages": messages, "options": options }))
            .map_err(|e| BackendError::Provider(e.to_string()))?;
        let digest = sha256_hex(request);

        debug!(model = %self.model, prompt_chars = prompt.len(), "echo generate");

        Ok(format!(
            "[{model}] {prompt}\n\n(request {short})\n",
            model = self.model,
            short = &digest[..12],
        ))
    }
}
