// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::model::DataMap;

/// Configuration as read from TOML, before validation.
///
/// ```toml
/// [job]
/// project = "demo"
/// backend = "echo"
/// concurrency = 2
/// timeout_secs = 1800
/// output_dir = "runs"
///
/// [backend]
/// model = "echo-1"
/// [backend.opts]
/// temperature = 0.0
///
/// [breaker]
/// threshold = 3
/// cooldown_secs = 30
///
/// [retry]
/// max_attempts = 3
/// base_delay_ms = 200
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub breaker: BreakerSection,

    #[serde(default)]
    pub retry: RetrySection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub job: JobSection,
    pub backend: BackendSection,
    pub breaker: BreakerSection,
    pub retry: RetrySection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        job: JobSection,
        backend: BackendSection,
        breaker: BreakerSection,
        retry: RetrySection,
    ) -> Self {
        Self {
            job,
            backend,
            breaker,
            retry,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let raw = RawConfigFile::default();
        Self::new_unchecked(raw.job, raw.backend, raw.breaker, raw.retry)
    }
}

/// `[job]`: defaults for every `JobSpec` field the CLI does not set.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    #[serde(default = "default_project")]
    pub project: String,

    /// `"<name>"` or `"<name>:<model>"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_project() -> String {
    "demo".to_string()
}

fn default_backend() -> String {
    "echo".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            project: default_project(),
            backend: default_backend(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
        }
    }
}

/// `[backend]`
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// Used when the selection string names no model.
    #[serde(default = "default_model")]
    pub model: String,

    /// Passed to every `generate` call and mixed into cache keys.
    #[serde(default)]
    pub opts: DataMap,
}

fn default_model() -> String {
    "echo-1".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            opts: DataMap::new(),
        }
    }
}

/// `[breaker]`
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

impl BreakerSection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// `[retry]`: applied beneath the breaker.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Total attempts including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

impl RetrySection {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}
