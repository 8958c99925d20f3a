// src/logging.rs

//! `tracing` subscriber setup.
//!
//! The filter comes from, in order:
//! 1. `--log-level`, applied to every target
//! 2. `STEPDAG_LOG`, any `EnvFilter` directive string (`debug`,
//!    `stepdag::dag=trace,info`, ...)
//! 3. `info`
//!
//! Output goes to stderr so stdout stays parseable (`stepdag events`).

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "STEPDAG_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let directive = resolve_directive(cli_level, env_value.as_deref());

    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter {directive:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

/// Filter directive for the given flag and `STEPDAG_LOG` value. A value that
/// `EnvFilter` cannot parse falls back to `info`.
pub fn resolve_directive(cli_level: Option<LogLevel>, env_value: Option<&str>) -> String {
    if let Some(level) = cli_level {
        return level.as_str().to_string();
    }
    env_value
        .map(str::trim)
        .filter(|v| !v.is_empty() && EnvFilter::try_new(v).is_ok())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_string()
}
