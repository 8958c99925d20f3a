// tests/file_store.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use stepdag::errors::StepdagError;
use stepdag::store::{lock_path, safe_write, safe_write_async, sha256_hex};
use stepdag::types::{WriteMode, WriteReason};
use stepdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn identical_rewrite_is_a_noop_and_keeps_mtime() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out").join("notes.md");

    let first = safe_write(&path, "hello\n", WriteMode::Overwrite)?;
    assert!(first.wrote);
    assert_eq!(first.reason, WriteReason::Created);
    assert_eq!(first.sha256, sha256_hex("hello\n"));
    assert_eq!(first.size_bytes, 6);
    let mtime = fs::metadata(&path)?.modified()?;

    std::thread::sleep(Duration::from_millis(20));
    let second = safe_write(&path, "hello\n", WriteMode::Overwrite)?;
    assert!(!second.wrote);
    assert_eq!(second.reason, WriteReason::Nochange);
    assert_eq!(second.sha256, first.sha256);
    assert_eq!(fs::metadata(&path)?.modified()?, mtime);
    Ok(())
}

#[test]
fn overwrite_with_new_content_changes_digest() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.md");

    let first = safe_write(&path, "v1", WriteMode::Overwrite)?;
    let second = safe_write(&path, "version two", WriteMode::Overwrite)?;

    assert!(second.wrote);
    assert_eq!(second.reason, WriteReason::Overwritten);
    assert_ne!(second.sha256, first.sha256);
    assert_eq!(second.sha256, sha256_hex("version two"));
    assert_eq!(second.size_bytes, 11);
    assert_eq!(fs::read_to_string(&path)?, "version two");
    Ok(())
}

#[test]
fn create_new_refuses_different_content() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("spec.json");

    safe_write(&path, "{}", WriteMode::CreateNew)?;

    let same = safe_write(&path, "{}", WriteMode::CreateNew)?;
    assert_eq!(same.reason, WriteReason::Nochange);
    assert!(!same.wrote);

    let err = safe_write(&path, "{\"a\":1}", WriteMode::CreateNew).unwrap_err();
    assert!(matches!(err, StepdagError::FileExists { .. }), "got {err:?}");
    assert_eq!(fs::read_to_string(&path)?, "{}");
    Ok(())
}

#[test]
fn append_always_writes_and_digests_the_whole_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("log.txt");

    let first = safe_write(&path, "one\n", WriteMode::Append)?;
    assert_eq!(first.reason, WriteReason::Created);

    let second = safe_write(&path, "one\n", WriteMode::Append)?;
    assert!(second.wrote);
    assert_eq!(second.reason, WriteReason::Appended);
    assert_eq!(second.size_bytes, 8);
    assert_eq!(second.sha256, sha256_hex("one\none\n"));
    assert_eq!(fs::read_to_string(&path)?, "one\none\n");
    Ok(())
}

#[test]
fn lock_file_sits_next_to_target() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("a.txt");

    safe_write(&path, "x", WriteMode::Overwrite)?;

    let lock = lock_path(&path);
    assert_eq!(lock, dir.path().join(".a.txt.lock"));
    assert!(lock.exists());
    Ok(())
}

#[tokio::test]
async fn concurrent_writers_create_the_file_exactly_once() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.md");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            safe_write_async(path, "same body", WriteMode::Overwrite).await
        }));
    }

    let mut created = 0;
    let mut unchanged = 0;
    for handle in handles {
        let outcome = with_timeout(handle).await??;
        match outcome.reason {
            WriteReason::Created => created += 1,
            WriteReason::Nochange => unchanged += 1,
            other => panic!("unexpected reason {other:?}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(unchanged, 7);
    assert_eq!(fs::read_to_string(&path)?, "same body");
    Ok(())
}
