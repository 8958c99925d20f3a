// src/config/validate.rs

use crate::backend::parse_selection;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, StepdagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StepdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.job,
            raw.backend,
            raw.breaker,
            raw.retry,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_job(cfg)?;
    validate_breaker(cfg)?;
    validate_retry(cfg)?;
    Ok(())
}

fn validate_job(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.concurrency == 0 {
        return Err(StepdagError::ConfigError(
            "[job].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.job.timeout_secs == 0 {
        return Err(StepdagError::ConfigError(
            "[job].timeout_secs must be > 0 (got 0)".to_string(),
        ));
    }
    validate_backend_selection(&cfg.job.backend)
}

/// Reject selection strings without a backend name, e.g. `""` or `":model"`.
pub fn validate_backend_selection(selection: &str) -> Result<()> {
    let (name, _) = parse_selection(selection);
    if name.is_empty() {
        return Err(StepdagError::ConfigError(format!(
            "backend selection must name a backend (got {selection:?})"
        )));
    }
    Ok(())
}

fn validate_breaker(cfg: &RawConfigFile) -> Result<()> {
    if cfg.breaker.threshold == 0 {
        return Err(StepdagError::ConfigError(
            "[breaker].threshold must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry(cfg: &RawConfigFile) -> Result<()> {
    if cfg.retry.max_attempts == 0 {
        return Err(StepdagError::ConfigError(
            "[retry].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
