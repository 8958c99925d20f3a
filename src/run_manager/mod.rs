// src/run_manager/mod.rs

//! Run directory layout, manifest snapshots and artifact materialization.
//!
//! ```text
//! <output_dir>/<job_id>/
//!   manifest.json
//!   events.jsonl
//!   inputs/job_spec.json
//!   outputs/
//!   logs/
//!   artifacts/
//!   .cache/<key>.json
//! ```

pub mod manifest;

pub use manifest::{FailureSummary, Manifest, StepSummary};

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{read_cache, write_cache, CACHE_DIR};
use crate::errors::{Result, StepdagError};
use crate::events::EVENTS_FILE;
use crate::model::{Artifact, Job, JobSpec};
use crate::store::{safe_write, safe_write_async, sha256_hex, WriteOutcome};
use crate::types::WriteMode;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const INPUTS_DIR: &str = "inputs";
pub const OUTPUTS_DIR: &str = "outputs";
pub const LOGS_DIR: &str = "logs";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const JOB_SPEC_FILE: &str = "job_spec.json";

/// Lowercase `project`, collapsing runs of other characters into `-`.
pub fn slugify(project: &str) -> Result<String> {
    let non_alnum = Regex::new(r"[^a-z0-9]+").map_err(anyhow::Error::from)?;
    let lowered = project.to_lowercase();
    let slug = non_alnum.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    Ok(if slug.is_empty() {
        "job".to_string()
    } else {
        slug.to_string()
    })
}

/// `<yyyymmddThhmmssZ>-<slug>-<8 hex>`
pub fn new_job_id(project: &str) -> Result<String> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = Uuid::new_v4().simple().to_string();
    Ok(format!("{stamp}-{}-{}", slugify(project)?, &suffix[..8]))
}

/// Owns the directory of one job run.
#[derive(Debug, Clone)]
pub struct RunManager {
    job_id: String,
    run_dir: PathBuf,
}

impl RunManager {
    pub fn new(output_dir: impl AsRef<Path>, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        let run_dir = output_dir.as_ref().join(&job_id);
        Self { job_id, run_dir }
    }

    /// Handle to a run directory that must already exist.
    pub fn open_existing(output_dir: impl AsRef<Path>, job_id: &str) -> Result<Self> {
        let manager = Self::new(output_dir, job_id);
        if !manager.run_dir.is_dir() {
            return Err(StepdagError::RunNotFound(format!(
                "{} (looked in {})",
                job_id,
                manager.run_dir.display()
            )));
        }
        Ok(manager)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.run_dir.join(EVENTS_FILE)
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.run_dir.join(INPUTS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.run_dir.join(OUTPUTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir.join(LOGS_DIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.run_dir.join(ARTIFACTS_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.run_dir.join(CACHE_DIR)
    }

    /// Create the directory layout, snapshot `spec` into
    /// `inputs/job_spec.json` and write the initial `running` manifest.
    pub fn create_structure(&self, spec: &JobSpec) -> Result<()> {
        for dir in [
            self.run_dir.clone(),
            self.inputs_dir(),
            self.outputs_dir(),
            self.logs_dir(),
            self.artifacts_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let spec_json = serde_json::to_vec_pretty(spec)?;
        safe_write(
            self.inputs_dir().join(JOB_SPEC_FILE),
            spec_json,
            WriteMode::Overwrite,
        )?;

        let manifest = Manifest::initial(&self.job_id, spec, Utc::now());
        self.write_manifest(&manifest)?;

        info!(job_id = %self.job_id, run_dir = %self.run_dir.display(), "created run directory");
        Ok(())
    }

    /// The spec snapshot written by [`RunManager::create_structure`].
    pub fn load_job_spec(&self) -> Result<JobSpec> {
        let raw = fs::read_to_string(self.inputs_dir().join(JOB_SPEC_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overwrite the manifest with the current state of `job`.
    pub fn update_manifest(&self, job: &Job) -> Result<WriteOutcome> {
        self.write_manifest(&Manifest::from_job(job))
    }

    pub fn read_manifest(&self) -> Result<Manifest> {
        let raw = fs::read_to_string(self.manifest_path())?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<WriteOutcome> {
        let body = serde_json::to_vec_pretty(manifest)?;
        let outcome = safe_write(self.manifest_path(), body, WriteMode::Overwrite)?;
        debug!(job_id = %self.job_id, status = %manifest.status, wrote = outcome.wrote, "manifest updated");
        Ok(outcome)
    }

    /// Write `content` to `rel_path` inside the run directory and describe it.
    ///
    /// `rel_path` must be relative and stay inside the run directory.
    pub async fn add_artifact(
        &self,
        rel_path: &str,
        content: impl Into<Vec<u8>>,
        media_type: &str,
    ) -> Result<(Artifact, WriteOutcome)> {
        let target = self.resolve(rel_path)?;
        let outcome = safe_write_async(target, content, WriteMode::Overwrite).await?;

        let artifact = Artifact {
            path: rel_path.to_string(),
            sha256: outcome.sha256.clone(),
            size_bytes: outcome.size_bytes,
            media_type: media_type.to_string(),
            created_at: Utc::now(),
        };
        debug!(path = %rel_path, sha256 = %artifact.sha256, wrote = outcome.wrote, "artifact written");
        Ok((artifact, outcome))
    }

    /// Absolute path for a run-relative path.
    pub fn resolve(&self, rel_path: &str) -> Result<PathBuf> {
        let rel = Path::new(rel_path);
        let escapes = rel.as_os_str().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StepdagError::InvalidPath(rel_path.to_string()));
        }
        Ok(self.run_dir.join(rel))
    }

    /// Ad-hoc lookup keyed by the SHA-256 of an arbitrary string.
    pub fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let entry = read_cache(&self.cache_dir(), &sha256_hex(key))?;
        Ok(entry.map(|e| e.response))
    }

    pub fn cache_put(&self, key: &str, value: &str) -> Result<()> {
        write_cache(&self.cache_dir(), &sha256_hex(key), value)?;
        Ok(())
    }
}
