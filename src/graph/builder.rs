//! Builder for constructing request graphs

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::graph::{GraphError, RequestGraph};
use crate::request::RequestSpec;

/// Builds a validated [`RequestGraph`] from request specs
#[derive(Debug, Default)]
pub struct GraphBuilder {
    specs: Vec<RequestSpec>,
}

impl GraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request
    pub fn add_request(mut self, spec: RequestSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Add several requests
    pub fn add_requests(mut self, specs: impl IntoIterator<Item = RequestSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Validate and link the collected requests
    pub fn compile(self) -> Result<RequestGraph, GraphError> {
        Self::build(self.specs)
    }

    /// Build a graph from `specs`.
    ///
    /// Duplicates are rejected first, then unknown references and cycles.
    /// Edges are only added once every check has passed, so a failed build
    /// never leaves a partially linked graph behind.
    #[instrument(skip(specs), fields(request_count = specs.len()))]
    pub fn build(specs: Vec<RequestSpec>) -> Result<RequestGraph, GraphError> {
        let mut graph = RequestGraph::new();
        for spec in specs {
            graph.insert(spec)?;
        }

        let mut cleared: HashSet<&str> = HashSet::new();
        for idx in graph.node_indices() {
            let spec = graph.node(idx).spec();
            check_dependencies(&graph, spec, &cleared)?;
            cleared.insert(spec.id.as_str());
        }

        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            let mut seen = HashSet::new();
            for dep in &graph.node(idx).spec().depends_on {
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                // Presence was verified above
                if let Some(dep_idx) = graph.index_of(dep) {
                    edges.push((dep_idx, idx));
                }
            }
        }
        for (dependency, dependent) in edges {
            graph.link(dependency, dependent);
        }

        debug!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            "Request graph built"
        );
        Ok(graph)
    }
}

/// Walk the dependency chain of `root`. Reaching `root` again is a cycle.
///
/// Nodes in `cleared` already passed their own walk: nothing below them is
/// missing, and `root` cannot be below them without `root` and that node sharing
/// a cycle, which their walk would have reported. They are not expanded again.
fn check_dependencies(
    graph: &RequestGraph,
    root: &RequestSpec,
    cleared: &HashSet<&str>,
) -> Result<(), GraphError> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&RequestSpec> = vec![root];

    while let Some(current) = stack.pop() {
        for dep in &current.depends_on {
            if dep == &root.id {
                return Err(GraphError::CircularReference(root.id.clone()));
            }

            let node = graph
                .node_by_id(dep)
                .ok_or_else(|| GraphError::UnknownReference {
                    request: current.id.clone(),
                    reference: dep.clone(),
                })?;

            if cleared.contains(node.id()) {
                continue;
            }
            if visited.insert(node.id()) {
                stack.push(node.spec());
            }
        }
    }

    Ok(())
}
