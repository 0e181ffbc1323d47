//! The immutable, built [`Graph`] type.
//!
//! Grounded on `nvisy_runtime::graph::graph::WorkflowGraph`: a `petgraph`
//! `DiGraph` plus `NodeId <-> NodeIndex` maps for O(1) lookup by the
//! caller-facing id type, with `topological_order()` delegating to
//! `petgraph::algo::toposort`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::edge::Edge;
use super::hash::GraphHash;
use super::node::{NodeDefinition, NodeId};

/// An immutable, validated workflow graph produced by
/// [`crate::graph::builder::GraphBuilder::build`].
pub struct Graph {
    pub(crate) topology: DiGraph<NodeId, ()>,
    pub(crate) node_index: HashMap<NodeId, NodeIndex>,
    pub(crate) nodes: HashMap<NodeId, NodeDefinition>,
    /// Insertion order, used to break topological-sort ties lexicographically
    /// (spec.md §4.2: "Ties broken by lexicographic id so test expectations
    /// are stable").
    pub(crate) node_order: Vec<NodeId>,
    pub(crate) edges: Vec<Edge>,
    /// Preconfigured node instances registered via
    /// `GraphBuilder::add_preconfigured_node_instance`, keyed by node id.
    pub(crate) preconfigured: HashMap<NodeId, Arc<dyn Any + Send + Sync>>,
    pub(crate) hash: GraphHash,
}

impl Graph {
    /// Returns the structural hash used as a compilation cache key.
    pub fn hash(&self) -> GraphHash {
        self.hash
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Looks up a node definition by id.
    pub fn node(&self, id: NodeId) -> Option<&NodeDefinition> {
        self.nodes.get(&id)
    }

    /// Returns all node definitions in builder insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Returns all edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the preconfigured instance registered for `id`, if any.
    pub fn preconfigured_instance(&self, id: NodeId) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.preconfigured.get(&id)
    }

    /// Returns ids of nodes producing output consumed directly by `id`.
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.node_index.get(&id) else {
            return Vec::new();
        };
        self.topology
            .neighbors_directed(idx, Direction::Incoming)
            .map(|i| self.topology[i])
            .collect()
    }

    /// Returns ids of nodes that consume `id`'s output directly.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.node_index.get(&id) else {
            return Vec::new();
        };
        self.topology
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|i| self.topology[i])
            .collect()
    }

    /// Returns how many distinct downstream nodes consume `id`'s output.
    /// Used by the runner to decide whether to interpose a multicast
    /// [`crate::pipe::branch::Branch`] wrapper (spec.md §4.2 step 3).
    pub fn fan_out(&self, id: NodeId) -> usize {
        self.successors(id).len()
    }

    /// Topologically sorts node ids, breaking ties lexicographically by id
    /// so test expectations are stable (spec.md §4.2 step 1). Returns
    /// `None` only if the graph is cyclic, which `build()` already
    /// forbids — present for defense in depth when a `Graph` is
    /// constructed by means other than the builder (e.g. in tests).
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        // petgraph's toposort does not guarantee a deterministic
        // tie-break; we Kahn's-algorithm it ourselves over sorted
        // candidate sets to get the stable order the spec requires.
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .keys()
            .map(|&id| (id, self.predecessors(id).len()))
            .collect();
        let mut ready: std::collections::BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            order.push(id);
            for succ in self.successors(id) {
                if let Some(deg) = in_degree.get_mut(&succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Some(order)
        } else {
            // Defense-in-depth fallback; `build()` already guarantees
            // acyclicity so this branch is unreachable in practice.
            toposort(&self.topology, None)
                .ok()
                .map(|idxs| idxs.into_iter().map(|i| self.topology[i]).collect())
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.node_count())
            .field("edge_count", &self.edge_count())
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::{GraphBuilder, NodeHandle};
    use crate::strategy::ExecutionStrategy;

    #[test]
    fn topological_order_is_lexicographically_stable() {
        let mut b = GraphBuilder::new();
        let src = b.add_source_with_id(crate::graph::node::NodeId::from_u128(2), "source", "i64");
        let t1 = b.add_transform_with_id(
            crate::graph::node::NodeId::from_u128(1),
            "t1",
            "i64",
            "i64",
            ExecutionStrategy::Sequential,
        );
        let t2 = b.add_transform_with_id(
            crate::graph::node::NodeId::from_u128(3),
            "t2",
            "i64",
            "i64",
            ExecutionStrategy::Sequential,
        );
        let sink = b.add_sink_with_id(crate::graph::node::NodeId::from_u128(4), "sink", "i64");
        b.connect(&src, &t1).unwrap();
        b.connect(&src, &t2).unwrap();
        b.connect(&t1, &sink).unwrap();
        b.connect(&t2, &sink).unwrap();
        let graph = b.build().unwrap();

        let order = graph.topological_order().unwrap();
        // src(2) must precede both t1(1) and t2(3); between the two
        // ready siblings, lexicographic tie-break picks t1(1) before t2(3).
        let pos = |id: crate::graph::node::NodeId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(src.id()) < pos(t1.id()));
        assert!(pos(src.id()) < pos(t2.id()));
        assert!(pos(t1.id()) < pos(t2.id()));
        assert!(pos(t1.id()) < pos(sink.id()));
        assert!(pos(t2.id()) < pos(sink.id()));
    }
}
