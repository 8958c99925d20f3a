#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use stepdag::config::{ConfigFile, RawConfigFile};
use stepdag::dag::{Dag, DagNode, DependencyResults, StepError};
use stepdag::model::{JobSpec, StepOutput};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the built-in defaults but with retry delays shortened so
/// failing tests stay fast.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.retry.base_delay_ms = 1;
        Self { config }
    }

    pub fn with_breaker(mut self, threshold: u32, cooldown_secs: u64) -> Self {
        self.config.breaker.threshold = threshold;
        self.config.breaker.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self.config.retry.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.backend.model = model.to_string();
        self
    }

    pub fn with_backend_opt(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.backend.opts.insert(key.to_string(), value.into());
        self
    }

    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.config.job.output_dir = dir.to_path_buf();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobSpec`.
pub struct JobSpecBuilder {
    spec: JobSpec,
}

impl JobSpecBuilder {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            spec: JobSpec {
                project: "demo".to_string(),
                task_description: "build a todo app".to_string(),
                backend: "echo".to_string(),
                concurrency: 2,
                timeout_secs: 30,
                output_dir: PathBuf::from(output_dir),
            },
        }
    }

    pub fn project(mut self, project: &str) -> Self {
        self.spec.project = project.to_string();
        self
    }

    pub fn task(mut self, task: &str) -> Self {
        self.spec.task_description = task.to_string();
        self
    }

    pub fn backend(mut self, selection: &str) -> Self {
        self.spec.backend = selection.to_string();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.spec.concurrency = n;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.spec.timeout_secs = secs;
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

/// Build a DAG from `(id, deps)` pairs whose steps succeed immediately with
/// `{"step": id, "deps": [ids of received dependency results]}`.
pub fn dag_from_edges<C>(edges: &[(&str, &[&str])]) -> Dag<C>
where
    C: Send + Sync + 'static,
{
    let mut dag = Dag::new();
    for (id, deps) in edges {
        let name = id.to_string();
        let step = move |_ctx: Arc<C>, received: DependencyResults| {
            let name = name.clone();
            async move {
                let seen: Vec<Value> = received.keys().map(|k| Value::from(k.as_str())).collect();
                Ok::<_, StepError>(StepOutput::new().with("step", name).with("deps", seen))
            }
        };
        dag.add_node(DagNode::new(*id, step, deps.iter().copied(), format!("step {id}")))
            .expect("duplicate node in test DAG");
    }
    dag
}
