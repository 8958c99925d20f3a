// src/backend/mod.rs

//! Generation-backend contract and the wrappers layered on top of it.
//!
//! The core only ever talks to a [`GenerationBackend`]. The stack used by the
//! orchestrator is, from the outside in:
//!
//! ```text
//!   GuardedBackend   (circuit breaker, sees one final outcome per call)
//!     RetryingBackend  (exponential backoff on timeout / rate limit)
//!       <concrete backend>
//! ```
//!
//! - [`echo`] is a deterministic offline backend.
//! - [`guarded`] puts a [`crate::breaker::CircuitBreaker`] in front of a backend.
//! - [`retry`] retries transient errors.

pub mod echo;
pub mod guarded;
pub mod retry;

pub use echo::EchoBackend;
pub use guarded::GuardedBackend;
pub use retry::RetryingBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{Result, StepdagError};
use crate::model::DataMap;
use crate::types::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One chat-style message sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Categorized backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend timed out: {0}")]
    Timeout(String),

    #[error("backend rate limited: {0}")]
    RateLimit(String),

    #[error("backend authentication failed: {0}")]
    Auth(String),

    #[error("backend error: {0}")]
    Provider(String),

    #[error("circuit breaker for backend '{backend}' is open (retry in {retry_in:?})")]
    CircuitOpen { backend: String, retry_in: Duration },
}

impl BackendError {
    /// Failure kind reported to the runner when this error aborts a step.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::CircuitOpen { .. } => FailureKind::CircuitBreaker,
            BackendError::RateLimit(_) | BackendError::Auth(_) | BackendError::Provider(_) => {
                FailureKind::Provider
            }
        }
    }

    /// Worth retrying after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::RateLimit(_))
    }
}

/// Contract every generation backend satisfies.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate(
        &self,
        messages: &[Message],
        options: &DataMap,
    ) -> std::result::Result<String, BackendError>;
}

/// Split a backend-selection string `"<name>"` or `"<name>:<model>"`.
pub fn parse_selection(selection: &str) -> (&str, Option<&str>) {
    match selection.split_once(':') {
        Some((name, model)) if !model.trim().is_empty() => (name.trim(), Some(model.trim())),
        Some((name, _)) => (name.trim(), None),
        None => (selection.trim(), None),
    }
}

/// Build the concrete backend named by `selection`.
///
/// `default_model` is used when the selection string names no model.
pub fn from_selection(selection: &str, default_model: &str) -> Result<Arc<dyn GenerationBackend>> {
    let (name, model) = parse_selection(selection);
    let model = model.unwrap_or(default_model);

    match name {
        "echo" => Ok(Arc::new(EchoBackend::new(model))),
        "" => Err(StepdagError::ConfigError(
            "backend selection must not be empty".to_string(),
        )),
        other => Err(StepdagError::ConfigError(format!(
            "unknown backend '{other}' (available: echo)"
        ))),
    }
}
