// src/backend/guarded.rs

//! Circuit-breaker wrapper around any [`GenerationBackend`].
//!
//! Each `GuardedBackend` owns its own breaker; breakers are never shared
//! between backends. A rejected call never reaches the inner backend and is
//! reported as [`BackendError::CircuitOpen`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::backend::{BackendError, GenerationBackend, Message};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::model::DataMap;

pub struct GuardedBackend {
    inner: Arc<dyn GenerationBackend>,
    breaker: CircuitBreaker,
}

impl GuardedBackend {
    pub fn new(inner: Arc<dyn GenerationBackend>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl GenerationBackend for GuardedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &DataMap,
    ) -> Result<String, BackendError> {
        let inner = Arc::clone(&self.inner);
        match self
            .breaker
            .call(move || async move { inner.generate(messages, options).await })
            .await
        {
            Ok(text) => Ok(text),
            Err(BreakerError::Open { retry_in, .. }) => {
                warn!(backend = %self.inner.name(), ?retry_in, "call rejected by open circuit");
                Err(BackendError::CircuitOpen {
                    backend: self.inner.name().to_string(),
                    retry_in,
                })
            }
            Err(BreakerError::Inner(err)) => Err(err),
        }
    }
}
