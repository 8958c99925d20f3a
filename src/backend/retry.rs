// src/backend/retry.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::{BackendError, GenerationBackend, Message};
use crate::model::DataMap;

/// Retries transient errors (timeout, rate limit) with exponential backoff:
/// the delay before retry `n` (0-based) is `base_delay * 2^n`.
///
/// Auth and provider errors are returned immediately.
pub struct RetryingBackend {
    inner: Arc<dyn GenerationBackend>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingBackend {
    /// `max_attempts` counts the first call; it is clamped to at least 1.
    pub fn new(inner: Arc<dyn GenerationBackend>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

#[async_trait]
impl GenerationBackend for RetryingBackend {
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
        let mut attempt = 1;
        loop {
            match self.inner.generate(messages, options).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(backend = %self.inner.name(), attempt, "succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        backend = %self.inner.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        error = %err,
                        "transient backend error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
