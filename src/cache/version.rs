// src/cache/version.rs

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info};

/// Source files whose contents define the fallback code version, relative to
/// the crate root. Editing any of them invalidates cached responses.
pub const CORE_SOURCES: &[&str] = &[
    "src/cache/key.rs",
    "src/dag/graph.rs",
    "src/dag/runner.rs",
    "src/dag/step.rs",
    "src/orchestrator/generate.rs",
    "src/orchestrator/steps.rs",
];

static CODE_VERSION: OnceLock<String> = OnceLock::new();

/// Version string mixed into every cache key.
///
/// Resolution order:
/// 1. `git rev-parse HEAD` in the crate directory
/// 2. blake3 over [`CORE_SOURCES`]
/// 3. the package version
///
/// Resolved once per process.
pub fn code_version() -> &'static str {
    CODE_VERSION.get_or_init(|| {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

        if let Some(rev) = git_revision(&root) {
            info!(code_version = %rev, "code version from git");
            return rev;
        }

        let sources: Vec<PathBuf> = CORE_SOURCES
            .iter()
            .map(|rel| root.join(rel))
            .filter(|p| p.is_file())
            .collect();
        if !sources.is_empty() {
            if let Ok(hash) = compute_hash_for_paths(&sources) {
                info!(code_version = %hash, "code version from core source hash");
                return hash;
            }
        }

        let fallback = format!("pkg-{}", env!("CARGO_PKG_VERSION"));
        info!(code_version = %fallback, "code version from package version");
        fallback
    })
}

fn git_revision(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

/// blake3 hex digest of one file's bytes.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("cannot hash {}", path.display()))?;
    let mut hasher = Hasher::new();
    hasher
        .update_reader(BufReader::new(file))
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest over a set of files, independent of the order they are given in.
///
/// Each existing file contributes `name NUL digest NUL`; entries that are not
/// regular files are skipped.
pub fn compute_hash_for_paths<I, P>(paths: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut files: Vec<PathBuf> = paths
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files.dedup();

    let mut combined = Hasher::new();
    for file in &files {
        let digest = compute_file_hash(file)?;
        let name = file.file_name().unwrap_or_default().to_string_lossy();
        combined.update(name.as_bytes());
        combined.update(&[0]);
        combined.update(digest.as_bytes());
        combined.update(&[0]);
    }

    let hash = combined.finalize().to_hex().to_string();
    debug!(files = files.len(), hash = %hash, "hashed file set");
    Ok(hash)
}
