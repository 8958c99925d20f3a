// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::dag::DagError;

#[derive(Error, Debug)]
pub enum StepdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid DAG: {0}")]
    Dag(#[from] DagError),

    #[error("File already exists with different content: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StepdagError>;
