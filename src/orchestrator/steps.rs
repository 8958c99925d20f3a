// src/orchestrator/steps.rs

//! The four-stage pipeline and the registry that maps step ids to step
//! functions.
//!
//! ```text
//!   architect --> builder --+
//!       |                   +--> qa
//!       +-----> docs -------+
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::Message;
use crate::dag::{Dag, DagNode, DependencyResults, Step, StepError};
use crate::errors::{Result, StepdagError};
use crate::model::StepOutput;
use crate::orchestrator::generate::PipelineContext;

pub const ARCHITECT: &str = "architect";
pub const BUILDER: &str = "builder";
pub const DOCS: &str = "docs";
pub const QA: &str = "qa";

/// Static description of one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub id: &'static str,
    pub deps: &'static [&'static str],
    pub description: &'static str,
    pub persona: &'static str,
    pub instructions: &'static str,
    /// Run-relative output file.
    pub artifact: &'static str,
}

pub static PIPELINE: [Stage; 4] = [
    Stage {
        id: ARCHITECT,
        deps: &[],
        description: "design the solution architecture",
        persona: "You are a senior software architect. Be concrete and brief.",
        instructions: "Describe the components, their responsibilities and the data flow between them.",
        artifact: "outputs/architecture.md",
    },
    Stage {
        id: BUILDER,
        deps: &[ARCHITECT],
        description: "implement the architecture",
        persona: "You are a pragmatic engineer who writes working code.",
        instructions: "Write the implementation that follows the architecture below.",
        artifact: "outputs/implementation.md",
    },
    Stage {
        id: DOCS,
        deps: &[ARCHITECT],
        description: "write user-facing documentation",
        persona: "You are a technical writer.",
        instructions: "Write a README covering purpose, setup and usage, based on the architecture below.",
        artifact: "outputs/README.md",
    },
    Stage {
        id: QA,
        deps: &[BUILDER, DOCS],
        description: "review implementation and documentation",
        persona: "You are a meticulous QA reviewer.",
        instructions: "Review the implementation and documentation below. List defects, gaps and inconsistencies.",
        artifact: "outputs/qa_report.md",
    },
];

pub fn stage(id: &str) -> Option<&'static Stage> {
    PIPELINE.iter().find(|s| s.id == id)
}

/// Step functions by id.
pub struct StepRegistry {
    steps: IndexMap<String, Arc<dyn Step<PipelineContext>>>,
}

impl Default for StepRegistry {
    /// Registry with the built-in implementation of every pipeline stage.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ARCHITECT, architect);
        registry.register(BUILDER, builder);
        registry.register(DOCS, docs);
        registry.register(QA, qa);
        registry
    }
}

impl StepRegistry {
    pub fn empty() -> Self {
        Self {
            steps: IndexMap::new(),
        }
    }

    /// Register (or replace) the step function for `id`.
    pub fn register<S>(&mut self, id: impl Into<String>, step: S) -> &mut Self
    where
        S: Step<PipelineContext> + 'static,
    {
        self.steps.insert(id.into(), Arc::new(step));
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Step<PipelineContext>>> {
        self.steps.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Build the pipeline graph from [`PIPELINE`]. Every stage must have a
    /// registered step.
    pub fn build_dag(&self) -> Result<Dag<PipelineContext>> {
        let mut dag = Dag::new();
        for stage in &PIPELINE {
            let step = self.get(stage.id).ok_or_else(|| {
                StepdagError::ConfigError(format!("no step registered for '{}'", stage.id))
            })?;
            dag.add_node(DagNode {
                id: stage.id.to_string(),
                step,
                deps: stage.deps.iter().map(|d| d.to_string()).collect(),
                description: stage.description.to_string(),
            })?;
        }
        dag.validate()?;
        Ok(dag)
    }
}

pub async fn architect(
    ctx: Arc<PipelineContext>,
    deps: DependencyResults,
) -> std::result::Result<StepOutput, StepError> {
    run_stage(&PIPELINE[0], ctx, deps).await
}

pub async fn builder(
    ctx: Arc<PipelineContext>,
    deps: DependencyResults,
) -> std::result::Result<StepOutput, StepError> {
    run_stage(&PIPELINE[1], ctx, deps).await
}

pub async fn docs(
    ctx: Arc<PipelineContext>,
    deps: DependencyResults,
) -> std::result::Result<StepOutput, StepError> {
    run_stage(&PIPELINE[2], ctx, deps).await
}

pub async fn qa(
    ctx: Arc<PipelineContext>,
    deps: DependencyResults,
) -> std::result::Result<StepOutput, StepError> {
    run_stage(&PIPELINE[3], ctx, deps).await
}

/// Prompt the backend with the task plus every dependency's text, write the
/// response to the stage's artifact and return `{text, artifact, cached}`.
pub async fn run_stage(
    stage: &Stage,
    ctx: Arc<PipelineContext>,
    deps: DependencyResults,
) -> std::result::Result<StepOutput, StepError> {
    let mut dep_texts = Map::new();
    for dep in stage.deps {
        let text = dependency_text(&ctx, &deps, dep).await?;
        dep_texts.insert(dep.to_string(), Value::String(text));
    }

    let mut prompt = format!(
        "Project: {}\nTask: {}\n\n{}\n",
        ctx.spec.project, ctx.spec.task_description, stage.instructions
    );
    for (dep, text) in &dep_texts {
        prompt.push_str(&format!("\n## Input from {dep}\n{}\n", text.as_str().unwrap_or("")));
    }

    let inputs = json!({
        "project": ctx.spec.project,
        "task_description": ctx.spec.task_description,
        "deps": dep_texts,
    });
    let messages = vec![Message::system(stage.persona), Message::user(prompt)];

    let generation = ctx.generate(stage.id, messages, &inputs).await?;
    let artifact = ctx
        .write_artifact(stage.id, stage.artifact, &generation.text, "text/markdown")
        .await?;

    debug!(step = %stage.id, cached = generation.cached, artifact = %artifact.path, "stage complete");

    Ok(StepOutput::new()
        .with("text", generation.text.clone())
        .with("artifact", artifact.path.clone())
        .with("cached", generation.cached)
        .with_provider_calls(generation.provider_calls())
        .with_artifact(artifact))
}

/// Text produced by dependency `dep`.
///
/// A dependency resumed from an earlier attempt may carry no text; its
/// artifact file (recorded path, else the stage's default path) is read
/// instead.
async fn dependency_text(
    ctx: &PipelineContext,
    deps: &DependencyResults,
    dep: &str,
) -> std::result::Result<String, StepError> {
    let result = deps
        .get(dep)
        .ok_or_else(|| StepError::validation(format!("missing result for dependency '{dep}'")))?;

    if let Some(text) = result.output_str("text") {
        return Ok(text.to_string());
    }

    let rel_path = result
        .output_str("artifact")
        .or_else(|| stage(dep).map(|s| s.artifact))
        .ok_or_else(|| StepError::validation(format!("dependency '{dep}' produced no text")))?;

    debug!(dependency = %dep, path = %rel_path, "reading dependency text from artifact");
    let path = ctx.run.resolve(rel_path)?;
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        StepError::validation(format!(
            "dependency '{dep}' has no text and its artifact {} is unreadable: {e}",
            path.display()
        ))
        .with_data("dependency", dep)
    })
}
