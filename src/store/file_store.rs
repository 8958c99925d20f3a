// src/store/file_store.rs

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use fd_lock::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{Result, StepdagError};
use crate::types::{WriteMode, WriteReason};

/// Result of a [`safe_write`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    /// Digest of the file as it is on disk after the call.
    pub sha256: String,
    pub size_bytes: u64,
    /// Whether the file was actually touched.
    pub wrote: bool,
    pub reason: WriteReason,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// Sidecar lock file for `path`: `<dir>/.<file name>.lock`.
pub fn lock_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    path.with_file_name(format!(".{name}.lock"))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write `content` to `path` according to `mode`.
///
/// | existing file | `CreateNew`            | `Overwrite`             | `Append`   |
/// |---------------|------------------------|-------------------------|------------|
/// | none          | created                | created                 | created    |
/// | same bytes    | nochange               | nochange                | appended   |
/// | other bytes   | [`StepdagError::FileExists`] | overwritten       | appended   |
///
/// The whole read-compare-write sequence holds an exclusive `fd-lock` on the
/// sidecar [`lock_path`]; the guard is dropped on every exit path.
pub fn safe_write(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    mode: WriteMode,
) -> Result<WriteOutcome> {
    let path = path.as_ref();
    let content = content.as_ref();
    let digest = sha256_hex(content);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path(path))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write()?;

    let existing = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let (wrote, reason) = match (existing, mode) {
        (None, _) => {
            replace_contents(path, content)?;
            (true, WriteReason::Created)
        }
        (Some(_), WriteMode::Append) => {
            let mut file = OpenOptions::new().append(true).open(path)?;
            file.write_all(content)?;
            file.sync_all()?;
            (true, WriteReason::Appended)
        }
        (Some(current), WriteMode::CreateNew) => {
            if sha256_hex(&current) != digest {
                return Err(StepdagError::FileExists {
                    path: path.to_path_buf(),
                });
            }
            (false, WriteReason::Nochange)
        }
        (Some(current), WriteMode::Overwrite) => {
            if sha256_hex(&current) == digest {
                (false, WriteReason::Nochange)
            } else {
                replace_contents(path, content)?;
                (true, WriteReason::Overwritten)
            }
        }
    };

    let (sha256, size_bytes) = if reason == WriteReason::Appended {
        let full = fs::read(path)?;
        (sha256_hex(&full), full.len() as u64)
    } else {
        (digest, content.len() as u64)
    };

    debug!(
        path = %path.display(),
        wrote,
        reason = reason.as_str(),
        size_bytes,
        "safe_write"
    );

    Ok(WriteOutcome {
        path: path.to_path_buf(),
        sha256,
        size_bytes,
        wrote,
        reason,
    })
}

/// [`safe_write`] on tokio's blocking pool, for callers on the async runtime.
pub async fn safe_write_async(
    path: impl Into<PathBuf>,
    content: impl Into<Vec<u8>>,
    mode: WriteMode,
) -> Result<WriteOutcome> {
    let path = path.into();
    let content = content.into();
    tokio::task::spawn_blocking(move || safe_write(&path, &content, mode))
        .await
        .map_err(|e| StepdagError::Other(anyhow!("file write task failed: {e}")))?
}

/// Write to a sibling temp file, fsync, then rename over the target.
/// Only called while the path lock is held, so the temp name cannot clash.
fn replace_contents(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
