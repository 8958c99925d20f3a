// src/cache/mod.rs

//! Deterministic, content-addressed cache of backend responses.
//!
//! - [`key`] derives the cache key from (backend, step, inputs, code version).
//! - [`entry`] reads and writes `<cache_dir>/<key>.json` files.
//! - [`version`] resolves the code version that invalidates stale entries.
//!
//! There is no eviction: entries accumulate for the lifetime of the run
//! directory.

pub mod entry;
pub mod key;
pub mod version;

pub use entry::{cache_path, read_cache, write_cache, write_cache_async, CacheEntry, CACHE_DIR};
pub use key::{compute_cache_key, BackendConfig};
pub use version::{code_version, compute_hash_for_paths};
