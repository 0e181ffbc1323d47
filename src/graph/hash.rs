//! Stable structural hash for a built [`crate::graph::Graph`].
//!
//! spec.md §4.1 requires `graphHash` to be "independent of insertion order
//! and independent of builder-internal identity". We achieve that by
//! sorting node ids and edges before feeding them to the hasher, exactly as
//! spec.md §3 defines the hash input: "a stable hash over (sorted node ids,
//! each node's kind + input/output type name, sorted edges)".

use std::hash::{Hash, Hasher};

use super::edge::Edge;
use super::node::NodeDefinition;

/// Opaque, stable structural hash of a graph's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphHash(u64);

impl GraphHash {
    /// Computes the structural hash of a node set + edge set.
    ///
    /// `nodes` and `edges` need not be sorted by the caller; this function
    /// sorts its own working copies so the result is order-independent.
    pub fn compute<'a>(
        nodes: impl Iterator<Item = &'a NodeDefinition>,
        edges: impl Iterator<Item = &'a Edge>,
    ) -> Self {
        let mut node_keys: Vec<String> = nodes
            .map(|n| {
                format!(
                    "{}|{}|{}|{}",
                    n.id,
                    n.kind,
                    n.input_type.unwrap_or(""),
                    n.output_type.unwrap_or("")
                )
            })
            .collect();
        node_keys.sort_unstable();

        let mut edge_keys: Vec<String> = edges
            .map(|e| {
                format!(
                    "{}|{}|{}|{}",
                    e.source,
                    e.target,
                    e.source_port.as_deref().unwrap_or(""),
                    e.target_port.as_deref().unwrap_or("")
                )
            })
            .collect();
        edge_keys.sort_unstable();

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        node_keys.hash(&mut hasher);
        edge_keys.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Returns the raw 64-bit hash value, e.g. for use as a cache key component.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GraphHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{NodeId, NodeKind};
    use crate::pipe::branch::BranchOptions;
    use crate::strategy::ExecutionStrategy;

    fn node(id: u128, kind: NodeKind, input: Option<&'static str>, output: Option<&'static str>) -> NodeDefinition {
        NodeDefinition {
            id: NodeId::from_u128(id),
            name: format!("n{id}"),
            kind,
            input_type: input,
            output_type: output,
            execution_strategy: ExecutionStrategy::Sequential,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        }
    }

    #[test]
    fn hash_is_independent_of_insertion_order() {
        let a = node(1, NodeKind::Source, None, Some("i64"));
        let b = node(2, NodeKind::Sink, Some("i64"), None);
        let edge = Edge::new(a.id, b.id);

        let h1 = GraphHash::compute(vec![&a, &b].into_iter(), vec![&edge].into_iter());
        let h2 = GraphHash::compute(vec![&b, &a].into_iter(), vec![&edge].into_iter());
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_changes_with_structure() {
        let a = node(1, NodeKind::Source, None, Some("i64"));
        let b = node(2, NodeKind::Sink, Some("i64"), None);
        let c = node(3, NodeKind::Sink, Some("i64"), None);
        let edge_ab = Edge::new(a.id, b.id);
        let edge_ac = Edge::new(a.id, c.id);

        let h1 = GraphHash::compute(vec![&a, &b].into_iter(), vec![&edge_ab].into_iter());
        let h2 = GraphHash::compute(vec![&a, &c].into_iter(), vec![&edge_ac].into_iter());
        assert_ne!(h1, h2);
    }
}
