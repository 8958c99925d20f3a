// tests/cache.rs

use std::error::Error;
use std::fs;

use serde_json::{json, Value};

use stepdag::cache::{
    cache_path, code_version, compute_cache_key, compute_hash_for_paths, read_cache, write_cache,
    BackendConfig,
};

type TestResult = Result<(), Box<dyn Error>>;

fn backend() -> BackendConfig {
    BackendConfig::new("echo", "echo-1").with_opt("temperature", 0.2)
}

fn inputs() -> Value {
    json!({ "task_description": "build a todo app", "deps": { "architect": "plan" } })
}

#[test]
fn cache_key_is_deterministic_hex_sha256() -> TestResult {
    let a = compute_cache_key(&backend(), "builder", &inputs(), "rev-1")?;
    let b = compute_cache_key(&backend(), "builder", &inputs(), "rev-1")?;

    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    Ok(())
}

#[test]
fn cache_key_ignores_object_key_order() -> TestResult {
    let mut forward = serde_json::Map::new();
    forward.insert("alpha".to_string(), json!(1));
    forward.insert("beta".to_string(), json!({ "y": 2, "x": 1 }));
    let mut backward = serde_json::Map::new();
    backward.insert("beta".to_string(), json!({ "x": 1, "y": 2 }));
    backward.insert("alpha".to_string(), json!(1));

    let a = compute_cache_key(&backend(), "qa", &Value::Object(forward), "rev")?;
    let b = compute_cache_key(&backend(), "qa", &Value::Object(backward), "rev")?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn changing_any_field_changes_the_key() -> TestResult {
    let base = compute_cache_key(&backend(), "builder", &inputs(), "rev-1")?;

    let variants = [
        compute_cache_key(
            &BackendConfig::new("other", "echo-1").with_opt("temperature", 0.2),
            "builder",
            &inputs(),
            "rev-1",
        )?,
        compute_cache_key(
            &BackendConfig::new("echo", "echo-2").with_opt("temperature", 0.2),
            "builder",
            &inputs(),
            "rev-1",
        )?,
        compute_cache_key(
            &BackendConfig::new("echo", "echo-1").with_opt("temperature", 0.9),
            "builder",
            &inputs(),
            "rev-1",
        )?,
        compute_cache_key(&backend(), "docs", &inputs(), "rev-1")?,
        compute_cache_key(&backend(), "builder", &json!({ "task_description": "x" }), "rev-1")?,
        compute_cache_key(&backend(), "builder", &inputs(), "rev-2")?,
    ];

    for (i, key) in variants.iter().enumerate() {
        assert_ne!(key, &base, "variant {i} collided with the base key");
    }
    Ok(())
}

#[test]
fn write_then_read_round_trips_an_entry() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cache_dir = dir.path().join(".cache");
    let key = compute_cache_key(&backend(), "architect", &inputs(), "rev")?;

    assert!(read_cache(&cache_dir, &key)?.is_none());

    let outcome = write_cache(&cache_dir, &key, "generated text")?;
    assert!(outcome.wrote);
    assert_eq!(outcome.path, cache_path(&cache_dir, &key));
    assert!(outcome.path.ends_with(format!("{key}.json")));

    let entry = read_cache(&cache_dir, &key)?.ok_or("entry missing after write")?;
    assert_eq!(entry.response, "generated text");
    assert_eq!(entry.cache_key, key);
    Ok(())
}

#[test]
fn corrupt_entry_reads_as_miss() -> TestResult {
    let dir = tempfile::tempdir()?;
    let key = "f".repeat(64);
    let path = cache_path(dir.path(), &key);
    fs::write(&path, "{ not json")?;

    assert!(read_cache(dir.path(), &key)?.is_none());

    write_cache(dir.path(), &key, "fresh")?;
    let entry = read_cache(dir.path(), &key)?.ok_or("entry missing after rewrite")?;
    assert_eq!(entry.response, "fresh");
    Ok(())
}

#[test]
fn path_hash_is_order_independent_and_content_sensitive() -> TestResult {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.rs");
    let b = dir.path().join("b.rs");
    fs::write(&a, "fn a() {}")?;
    fs::write(&b, "fn b() {}")?;

    let forward = compute_hash_for_paths([&a, &b])?;
    let backward = compute_hash_for_paths([&b, &a])?;
    assert_eq!(forward, backward);

    fs::write(&b, "fn b() { todo!() }")?;
    assert_ne!(compute_hash_for_paths([&a, &b])?, forward);
    Ok(())
}

#[test]
fn code_version_is_stable_within_a_process() {
    let first = code_version();
    assert!(!first.is_empty());
    assert_eq!(code_version(), first);
}
