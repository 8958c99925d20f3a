// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::dot::{Config, Dot};
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::dag::step::Step;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    MissingDependency { node: String, dependency: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// One named step plus the ids it depends on.
pub struct DagNode<C> {
    pub id: String,
    pub step: Arc<dyn Step<C>>,
    pub deps: Vec<String>,
    pub description: String,
}

impl<C> DagNode<C> {
    pub fn new<S, I, D>(id: impl Into<String>, step: S, deps: I, description: impl Into<String>) -> Self
    where
        S: Step<C> + 'static,
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        Self {
            id: id.into(),
            step: Arc::new(step),
            deps: deps.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }
}

impl<C> Clone for DagNode<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            step: Arc::clone(&self.step),
            deps: self.deps.clone(),
            description: self.description.clone(),
        }
    }
}

impl<C> fmt::Debug for DagNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagNode")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Step graph keyed by node id. Iteration follows insertion order, which is
/// also the tie-break order for readiness and topological sorting.
pub struct Dag<C> {
    nodes: IndexMap<String, DagNode<C>>,
}

impl<C> Default for Dag<C> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }
}

impl<C> fmt::Debug for Dag<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.values()).finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl<C> Dag<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Dependencies are not checked until [`Dag::validate`].
    pub fn add_node(&mut self, node: DagNode<C>) -> Result<(), DagError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DagError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DagNode<C>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DagNode<C>> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Nodes that list `id` as a direct dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.deps.iter().any(|d| d == id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Check that every dependency exists and that the graph is acyclic.
    pub fn validate(&self) -> Result<(), DagError> {
        for node in self.nodes.values() {
            for dep in &node.deps {
                if !self.nodes.contains_key(dep) {
                    return Err(DagError::MissingDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut path: Vec<&str> = Vec::new();
        for id in self.nodes.keys() {
            if !marks.contains_key(id.as_str()) {
                self.visit(id, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    /// Depth-first walk along dependency edges. Reaching a node that is still
    /// on the current path is a back-edge.
    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), DagError> {
        marks.insert(id, Mark::Visiting);
        path.push(id);

        if let Some(node) = self.nodes.get(id) {
            for dep in &node.deps {
                match marks.get(dep.as_str()).copied() {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Err(DagError::Cycle { path: cycle });
                    }
                    None => self.visit(dep, marks, path)?,
                }
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    /// Every node not in `completed` whose dependencies are all in
    /// `completed`, in insertion order.
    pub fn get_ready_nodes(&self, completed: &HashSet<String>) -> Vec<&DagNode<C>> {
        self.nodes
            .values()
            .filter(|n| !completed.contains(&n.id))
            .filter(|n| n.deps.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Kahn's algorithm. Among nodes that become ready at the same time,
    /// earlier-inserted nodes come first.
    pub fn topological_sort(&self) -> Result<Vec<String>, DagError> {
        self.validate()?;

        let mut in_degree: IndexMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.id.as_str(), n.deps.iter().collect::<HashSet<_>>().len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for dependent in self.dependents_of(id) {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining = self
                .nodes
                .keys()
                .filter(|id| !order.contains(*id))
                .cloned()
                .collect();
            return Err(DagError::Cycle { path: remaining });
        }
        Ok(order)
    }

    /// Graphviz rendering with edges pointing from dependency to dependent.
    pub fn to_dot(&self) -> String {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(id.as_str());
        }
        for node in self.nodes.values() {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), node.id.as_str(), ());
            }
        }
        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}
