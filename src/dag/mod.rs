// src/dag/mod.rs

//! DAG representation and execution.
//!
//! - [`graph`] holds the step graph: insertion, validation, readiness and
//!   topological ordering.
//! - [`step`] defines what a step is and the typed errors steps raise.
//! - [`runner`] executes a graph in concurrent waves with resume and an
//!   overall timeout.

pub mod graph;
pub mod runner;
pub mod step;

pub use graph::{Dag, DagError, DagNode};
pub use runner::{DagRunner, RunError, RunResults};
pub use step::{DependencyResults, Step, StepError, StepFuture};
