// src/cache/entry.rs

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::store::{safe_write, safe_write_async, WriteOutcome};
use crate::types::WriteMode;

/// Name of the cache directory inside a run directory.
pub const CACHE_DIR: &str = ".cache";

/// On-disk shape of one cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    pub cached_at: DateTime<Utc>,
    pub cache_key: String,
}

/// `<cache_dir>/<key>.json`
pub fn cache_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(format!("{key}.json"))
}

/// Look up `key`. A missing file is a miss; so is an unreadable entry, which
/// is logged and later overwritten by the next [`write_cache`].
pub fn read_cache(cache_dir: &Path, key: &str) -> Result<Option<CacheEntry>> {
    let path = cache_path(cache_dir, key);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(key = %key, "cache miss");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<CacheEntry>(&raw) {
        Ok(entry) => {
            debug!(key = %key, "cache hit");
            Ok(Some(entry))
        }
        Err(e) => {
            warn!(key = %key, error = %e, "corrupt cache entry; treating as miss");
            Ok(None)
        }
    }
}

fn entry_bytes(key: &str, response: &str) -> Result<Vec<u8>> {
    let entry = CacheEntry {
        response: response.to_string(),
        cached_at: Utc::now(),
        cache_key: key.to_string(),
    };
    Ok(serde_json::to_vec_pretty(&entry)?)
}

/// Store `response` under `key`, creating the cache directory if needed.
pub fn write_cache(cache_dir: &Path, key: &str, response: &str) -> Result<WriteOutcome> {
    let body = entry_bytes(key, response)?;
    safe_write(cache_path(cache_dir, key), body, WriteMode::Overwrite)
}

/// [`write_cache`] for callers on the async runtime.
pub async fn write_cache_async(cache_dir: &Path, key: &str, response: &str) -> Result<WriteOutcome> {
    let body = entry_bytes(key, response)?;
    safe_write_async(cache_path(cache_dir, key), body, WriteMode::Overwrite).await
}
