// src/store/mod.rs

//! Content-addressed, idempotent file writes.
//!
//! Every write hashes its content with SHA-256 and runs under an exclusive
//! lock scoped to the target path, so concurrent writers of the same path are
//! serialized and re-writing identical bytes is a no-op.

pub mod file_store;

pub use file_store::{lock_path, safe_write, safe_write_async, sha256_hex, WriteOutcome};
