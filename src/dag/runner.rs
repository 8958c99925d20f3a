// src/dag/runner.rs

//! Wave-based DAG execution.
//!
//! Each wave launches every ready node at once (bounded by a semaphore shared
//! across the whole run) and waits for all of them before looking at
//! failures. Siblings in a wave therefore never cancel each other; the first
//! failed node in insertion order aborts the run once its wave is done.
//!
//! The overall timeout and an external cancel signal both stop waiting for
//! outstanding steps and hand back what finished so far. Steps already in
//! flight are not cancelled; their spawned tasks run on detached.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::dag::graph::{Dag, DagError};
use crate::dag::step::{DependencyResults, StepError};
use crate::errors::StepdagError;
use crate::events::{prior_successes, read_events, EventLog, PriorSuccess};
use crate::model::{Failure, StepResult};
use crate::types::FailureKind;

pub type RunResults = BTreeMap<String, StepResult>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("deadlock: no step is ready but {} remain ({})", stuck.len(), stuck.join(", "))]
    Deadlock { stuck: Vec<String> },

    #[error("step '{}' failed ({}): {}", failure.step.as_deref().unwrap_or("?"), failure.kind, failure.message)]
    StepFailed {
        failure: Box<Failure>,
        results: RunResults,
    },

    #[error("run timed out after {after:?}")]
    Timeout { after: Duration, results: RunResults },

    #[error("run cancelled")]
    Cancelled { results: RunResults },

    #[error("could not load previous progress: {0}")]
    Resume(#[from] StepdagError),
}

impl RunError {
    /// Structured failure for the job record.
    pub fn to_failure(&self) -> Failure {
        match self {
            RunError::StepFailed { failure, .. } => (**failure).clone(),
            RunError::Timeout { .. } => Failure::new(FailureKind::Timeout, None, self.to_string()),
            RunError::Cancelled { .. } => Failure::new(FailureKind::Tool, None, self.to_string()),
            RunError::Dag(_) | RunError::Deadlock { .. } => {
                Failure::new(FailureKind::Validation, None, self.to_string())
            }
            RunError::Resume(_) => Failure::new(FailureKind::Tool, None, self.to_string()),
        }
    }

    /// Results recorded before the run was aborted.
    pub fn partial_results(&self) -> Option<&RunResults> {
        match self {
            RunError::StepFailed { results, .. }
            | RunError::Timeout { results, .. }
            | RunError::Cancelled { results } => Some(results),
            _ => None,
        }
    }

    pub fn into_partial_results(self) -> RunResults {
        match self {
            RunError::StepFailed { results, .. }
            | RunError::Timeout { results, .. }
            | RunError::Cancelled { results } => results,
            _ => RunResults::new(),
        }
    }
}

/// Why the wave loop stopped early.
enum Abort {
    Deadlock(Vec<String>),
    Failed(Failure),
}

/// Why the runner stopped waiting for the wave loop.
enum Interrupt {
    TimedOut(Duration),
    Cancelled,
}

#[derive(Default)]
struct RunState {
    completed: HashSet<String>,
    results: RunResults,
}

impl RunState {
    fn record(&mut self, result: StepResult) {
        if result.is_success() {
            self.completed.insert(result.step_id.clone());
        }
        self.results.insert(result.step_id.clone(), result);
    }
}

#[derive(Debug, Clone)]
pub struct DagRunner {
    concurrency: usize,
    timeout: Option<Duration>,
    resume: bool,
    events: Arc<EventLog>,
}

impl DagRunner {
    /// `concurrency` is clamped to at least 1.
    pub fn new(concurrency: usize, events: Arc<EventLog>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout: None,
            resume: false,
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Execute every node of `dag` and return their results keyed by id.
    pub async fn run<C>(&self, dag: &Dag<C>, ctx: Arc<C>) -> Result<RunResults, RunError>
    where
        C: Send + Sync + 'static,
    {
        self.run_until(dag, ctx, future::pending()).await
    }

    /// Like [`DagRunner::run`], but stop with [`RunError::Cancelled`] once
    /// `cancel` completes. Results recorded before that are kept.
    pub async fn run_until<C, F>(
        &self,
        dag: &Dag<C>,
        ctx: Arc<C>,
        cancel: F,
    ) -> Result<RunResults, RunError>
    where
        C: Send + Sync + 'static,
        F: Future<Output = ()>,
    {
        dag.validate()?;

        let previous = if self.resume {
            let events = read_events(self.events.path())?;
            let done = prior_successes(&events);
            info!(
                job_id = %self.events.job_id(),
                previously_succeeded = done.len(),
                "resuming run"
            );
            done
        } else {
            HashMap::new()
        };

        let mut state = RunState::default();
        let work = self.run_waves(dag, ctx, &previous, &mut state);

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .map_err(|_| Interrupt::TimedOut(limit)),
                None => Ok(work.await),
            }
        };
        let outcome = tokio::select! {
            res = bounded => res,
            _ = cancel => Err(Interrupt::Cancelled),
        };

        match outcome {
            Ok(Ok(())) => Ok(state.results),
            Ok(Err(Abort::Deadlock(stuck))) => {
                error!(job_id = %self.events.job_id(), ?stuck, "DAG deadlock");
                Err(RunError::Deadlock { stuck })
            }
            Ok(Err(Abort::Failed(failure))) => Err(RunError::StepFailed {
                failure: Box::new(failure),
                results: state.results,
            }),
            Err(Interrupt::TimedOut(after)) => {
                error!(job_id = %self.events.job_id(), ?after, "DAG run timed out");
                Err(RunError::Timeout {
                    after,
                    results: state.results,
                })
            }
            Err(Interrupt::Cancelled) => {
                warn!(
                    job_id = %self.events.job_id(),
                    finished = state.results.len(),
                    "DAG run cancelled"
                );
                Err(RunError::Cancelled {
                    results: state.results,
                })
            }
        }
    }

    async fn run_waves<C>(
        &self,
        dag: &Dag<C>,
        ctx: Arc<C>,
        previous: &HashMap<String, PriorSuccess>,
        state: &mut RunState,
    ) -> Result<(), Abort>
    where
        C: Send + Sync + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut wave = 0usize;

        while state.completed.len() < dag.len() {
            let ready = dag.get_ready_nodes(&state.completed);
            if ready.is_empty() {
                let stuck = dag
                    .ids()
                    .filter(|id| !state.completed.contains(*id))
                    .map(str::to_string)
                    .collect();
                return Err(Abort::Deadlock(stuck));
            }

            wave += 1;
            let mut handles: Vec<(String, JoinHandle<StepResult>)> = Vec::with_capacity(ready.len());

            for node in ready {
                if let Some(prior) = previous.get(&node.id) {
                    debug!(step = %node.id, "skipping step completed in an earlier attempt");
                    self.events
                        .step_skipped(&node.id, "succeeded in a previous attempt");
                    state.record(StepResult::resumed(
                        &node.id,
                        prior.output.clone(),
                        prior.artifacts.clone(),
                    ));
                    continue;
                }

                let deps: DependencyResults = node
                    .deps
                    .iter()
                    .filter_map(|d| state.results.get(d).map(|r| (d.clone(), r.clone())))
                    .collect();

                let id = node.id.clone();
                let dep_ids = node.deps.clone();
                let step = Arc::clone(&node.step);
                let ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                let events = Arc::clone(&self.events);

                let handle = tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            let now = Utc::now();
                            let failure = StepError::provider(format!("scheduler closed: {e}"))
                                .into_failure(&id);
                            events.step_failed(&id, &failure);
                            return StepResult::failed(id, failure, now, now);
                        }
                    };

                    events.step_started(&id, &dep_ids);
                    let started = Utc::now();
                    let outcome = step.run(ctx, deps).await;
                    let finished = Utc::now();

                    match outcome {
                        Ok(output) => {
                            let result = StepResult::succeeded(id, output, started, finished);
                            events.step_succeeded(&result);
                            result
                        }
                        Err(err) => {
                            let failure = err.into_failure(&id);
                            events.step_failed(&id, &failure);
                            StepResult::failed(id, failure, started, finished)
                        }
                    }
                });
                handles.push((node.id.clone(), handle));
            }

            debug!(wave, launched = handles.len(), "wave launched");

            let mut first_failure: Option<Failure> = None;
            for (id, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        let now = Utc::now();
                        let failure = join_failure(&id, join_err);
                        self.events.step_failed(&id, &failure);
                        StepResult::failed(id, failure, now, now)
                    }
                };

                if first_failure.is_none() {
                    first_failure = result.failure.clone();
                }
                state.record(result);
            }

            if let Some(failure) = first_failure {
                error!(
                    wave,
                    step = failure.step.as_deref().unwrap_or("?"),
                    kind = %failure.kind,
                    "step failed; aborting run"
                );
                return Err(Abort::Failed(failure));
            }
        }

        info!(waves = wave, steps = state.results.len(), "DAG run complete");
        Ok(())
    }
}

/// A step task that panicked or was cancelled is a provider failure.
fn join_failure(step: &str, err: JoinError) -> Failure {
    let message = if err.is_panic() {
        format!("step panicked: {}", panic_message(err.into_panic()))
    } else {
        "step task was cancelled".to_string()
    };
    StepError::provider(message).into_failure(step)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
