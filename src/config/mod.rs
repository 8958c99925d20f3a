// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a raw config into a checked [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    BackendSection, BreakerSection, ConfigFile, JobSection, RawConfigFile, RetrySection,
};
pub use validate::validate_backend_selection;
