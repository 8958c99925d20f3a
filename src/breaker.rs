// src/breaker.rs

//! Three-state circuit breaker guarding one backend connection.
//!
//! ```text
//!   Closed --(threshold consecutive failures)--> Open
//!   Open   --(cooldown elapsed, next call)-----> HalfOpen (single probe)
//!   HalfOpen --(probe ok)----------------------> Closed
//!   HalfOpen --(probe failed)------------------> Open
//! ```
//!
//! State is in memory only and starts `Closed` in every process.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the wrapped function.
    #[error("circuit breaker '{name}' is open (retry in {retry_in:?})")]
    Open { name: String, retry_in: Duration },

    /// The wrapped function ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// `threshold` is clamped to at least 1.
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Run `f` through the breaker.
    ///
    /// While open (and before the cooldown has elapsed) `f` is never invoked.
    /// If the future is dropped before completing, a probe counts as failed.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.admit().map_err(|retry_in| BreakerError::Open {
            name: self.name.clone(),
            retry_in,
        })?;

        match f().await {
            Ok(value) => {
                permit.settle(true);
                Ok(value)
            }
            Err(err) => {
                permit.settle(false);
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a call may proceed. `Err` carries the remaining cooldown.
    fn admit(&self) -> Result<Permit<'_>, Duration> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Permit::new(self, false)),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed < self.cooldown {
                    return Err(self.cooldown - elapsed);
                }
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = true;
                info!(breaker = %self.name, "cooldown elapsed; allowing probe call");
                Ok(Permit::new(self, true))
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        if !probe {
            // Only the probe may close a breaker that has left `Closed`.
            if inner.state == BreakerState::Closed {
                inner.consecutive_failures = 0;
            }
            return;
        }

        inner.probe_in_flight = false;
        info!(breaker = %self.name, "probe succeeded; closing circuit");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            BreakerState::HalfOpen if probe => {
                warn!(breaker = %self.name, "probe failed; reopening circuit");
                self.trip(&mut inner);
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.threshold,
                        "failure threshold reached; opening circuit"
                    );
                    self.trip(&mut inner);
                }
            }
            // A call admitted while closed finished after another call opened
            // the breaker; the open timestamp and any probe stay as they are.
            BreakerState::Open | BreakerState::HalfOpen => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_failures = 0;
    }
}

/// Outcome slot for one admitted call. Dropping it unsettled (the caller's
/// future was cancelled) counts as a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, ok: bool) {
        self.settled = true;
        if ok {
            self.breaker.record_success(self.probe);
        } else {
            self.breaker.record_failure(self.probe);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure(self.probe);
        }
    }
}
