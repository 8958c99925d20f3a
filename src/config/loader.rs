// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a TOML file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Read, deserialize and validate a config file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Load the config the CLI should use.
///
/// An explicit path must exist. Without one, [`default_config_path`] is used
/// if present, otherwise built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return load_and_validate(path);
    }

    let default_path = default_config_path();
    if default_path.is_file() {
        debug!(path = %default_path.display(), "loading default config file");
        load_and_validate(default_path)
    } else {
        debug!("no config file; using built-in defaults");
        Ok(ConfigFile::default())
    }
}

/// `Stepdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Stepdag.toml")
}
