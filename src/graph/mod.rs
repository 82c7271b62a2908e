//! Request dependency graph
//!
//! Nodes live in a petgraph arena and are addressed by [`NodeIndex`]. An edge
//! points from a dependency to the request waiting on it, so a node's incoming
//! neighbours are its predecessors and its outgoing neighbours its successors.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::RequestSpec;

pub mod builder;

pub use builder::GraphBuilder;

/// Errors raised while building a request graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two requests share an id
    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    /// A request depends on an id that is not in the batch
    #[error("Request {request} depends on unknown request {reference}")]
    UnknownReference {
        /// Request declaring the dependency
        request: String,
        /// Missing id
        reference: String,
    },

    /// Following dependencies leads back to the named request
    #[error("Circular reference detected at request {0}")]
    CircularReference(String),
}

/// Execution state of a node. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecutionState {
    /// Not dispatched yet
    Pending = 0,
    /// HTTP call issued
    Started = 1,
    /// Call settled and outcome recorded
    Finished = 2,
}

impl ExecutionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutionState::Pending,
            1 => ExecutionState::Started,
            _ => ExecutionState::Finished,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Started => "started",
            ExecutionState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// One request in the graph plus its execution state
pub struct RequestNode {
    spec: RequestSpec,
    state: AtomicU8,
}

impl RequestNode {
    pub(crate) fn new(spec: RequestSpec) -> Self {
        Self {
            spec,
            state: AtomicU8::new(ExecutionState::Pending as u8),
        }
    }

    /// Request id
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// The wrapped request
    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    /// Current execution state
    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Claim the node for dispatch. Returns `false` if it was not Pending.
    pub fn mark_started(&self) -> bool {
        self.state
            .compare_exchange(
                ExecutionState::Pending as u8,
                ExecutionState::Started as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Mark the node settled
    pub fn mark_finished(&self) {
        self.state
            .fetch_max(ExecutionState::Finished as u8, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ExecutionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl fmt::Debug for RequestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestNode")
            .field("id", &self.spec.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Immutable-topology graph of the requests in one batch
#[derive(Debug, Default)]
pub struct RequestGraph {
    /// Node arena; edges run dependency -> dependent
    graph: DiGraph<RequestNode, ()>,

    /// Request id to node index
    index: HashMap<String, NodeIndex>,
}

impl RequestGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, spec: RequestSpec) -> Result<NodeIndex, GraphError> {
        if self.index.contains_key(&spec.id) {
            return Err(GraphError::DuplicateId(spec.id));
        }
        let id = spec.id.clone();
        let idx = self.graph.add_node(RequestNode::new(spec));
        self.index.insert(id, idx);
        Ok(idx)
    }

    pub(crate) fn link(&mut self, dependency: NodeIndex, dependent: NodeIndex) {
        self.graph.add_edge(dependency, dependent, ());
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph holds no requests
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node by index
    pub fn node(&self, idx: NodeIndex) -> &RequestNode {
        &self.graph[idx]
    }

    /// Index of the request with `id`
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Node by request id
    pub fn node_by_id(&self, id: &str) -> Option<&RequestNode> {
        self.index_of(id).map(|idx| &self.graph[idx])
    }

    /// Request ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.node_weights().map(|node| node.id())
    }

    /// Indices of all nodes in insertion order
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Nodes that must finish before `idx` may start
    pub fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    /// Nodes waiting on `idx`
    pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    /// Nodes without predecessors, in insertion order. Call again to restart.
    pub fn roots(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices().filter(move |&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
    }

    /// True iff every predecessor of `idx` is Finished
    pub fn is_ready(&self, idx: NodeIndex) -> bool {
        self.predecessors(idx)
            .all(|pred| self.graph[pred].state() == ExecutionState::Finished)
    }
}
