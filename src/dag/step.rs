// src/dag/step.rs

//! Step functions and the typed errors they raise.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::backend::BackendError;
use crate::errors::StepdagError;
use crate::model::{DataMap, Failure, StepOutput, StepResult};
use crate::types::FailureKind;

/// Results of a node's direct dependencies, keyed by step id.
pub type DependencyResults = BTreeMap<String, StepResult>;

pub type StepFuture = Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send>>;

/// A unit of work attached to a DAG node.
///
/// `C` is the shared context handed to every step of a run. Any
/// `Fn(Arc<C>, DependencyResults) -> impl Future` closure is a step.
pub trait Step<C>: Send + Sync {
    fn run(&self, ctx: Arc<C>, deps: DependencyResults) -> StepFuture;
}

impl<C, F, Fut> Step<C> for F
where
    F: Fn(Arc<C>, DependencyResults) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
{
    fn run(&self, ctx: Arc<C>, deps: DependencyResults) -> StepFuture {
        Box::pin(self(ctx, deps))
    }
}

/// Error raised by a step. The kind is chosen where the error originates.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
    pub data: DataMap,
}

impl StepError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: DataMap::new(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Provider, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Tool, message)
    }

    pub fn circuit_breaker(message: impl Into<String>) -> Self {
        Self::new(FailureKind::CircuitBreaker, message)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn into_failure(self, step: &str) -> Failure {
        Failure::new(self.kind, Some(step.to_string()), self.message).with_data(self.data)
    }
}

impl From<BackendError> for StepError {
    fn from(err: BackendError) -> Self {
        let kind = err.failure_kind();
        let mut out = StepError::new(kind, err.to_string());
        if let BackendError::CircuitOpen { backend, retry_in } = &err {
            out = out
                .with_data("backend", backend.clone())
                .with_data("retry_in_ms", retry_in.as_millis() as u64);
        }
        out
    }
}

/// Store and IO problems inside a step are `tool` failures; backend errors
/// keep their own classification.
impl From<StepdagError> for StepError {
    fn from(err: StepdagError) -> Self {
        match err {
            StepdagError::Backend(e) => e.into(),
            other => StepError::tool(other.to_string()),
        }
    }
}
