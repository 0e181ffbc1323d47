//! Graph validation passes, run in the exact order required by spec.md §4.1.

use std::collections::{HashMap, HashSet};

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::edge::Edge;
use super::node::{NodeDefinition, NodeId, NodeKind};
use crate::error::GraphValidationError as E;

/// Runs all five validation passes from spec.md §4.1, in order, returning
/// the first failure encountered (each pass fully checks the graph before
/// the next pass begins, so failures are reported deterministically).
pub(crate) fn validate(
    nodes: &HashMap<NodeId, NodeDefinition>,
    node_order: &[NodeId],
    edges: &[Edge],
) -> Result<(), E> {
    check_duplicate_ids(node_order)?;
    check_unknown_endpoints(nodes, edges)?;
    check_acyclic(nodes, edges)?;
    check_source_sink_edges(nodes, edges)?;
    check_type_compatibility(nodes, edges)?;
    Ok(())
}

/// Pass 1: duplicate node id. `node_order` is allowed to contain a ward id
/// twice only if the builder failed to catch it at `add_*` time; this pass
/// is the authoritative check.
fn check_duplicate_ids(node_order: &[NodeId]) -> Result<(), E> {
    let mut seen = HashSet::with_capacity(node_order.len());
    for id in node_order {
        if !seen.insert(*id) {
            return Err(E::DuplicateNodeId(*id));
        }
    }
    Ok(())
}

/// Pass 2: every edge endpoint refers to a node that exists.
fn check_unknown_endpoints(nodes: &HashMap<NodeId, NodeDefinition>, edges: &[Edge]) -> Result<(), E> {
    for edge in edges {
        if !nodes.contains_key(&edge.source) {
            return Err(E::UnknownEndpoint(edge.source));
        }
        if !nodes.contains_key(&edge.target) {
            return Err(E::UnknownEndpoint(edge.target));
        }
    }
    Ok(())
}

/// Pass 3: the graph must be acyclic. On failure, reports the minimal cycle
/// vertex set using Kosaraju's strongly-connected-components algorithm: any
/// SCC with more than one node is a cycle (a self-loop would be a
/// single-node SCC with a self edge, which `check_unknown_endpoints`-style
/// edge presence already covers via `petgraph`'s edge list).
fn check_acyclic(nodes: &HashMap<NodeId, NodeDefinition>, edges: &[Edge]) -> Result<(), E> {
    let mut graph = DiGraph::<NodeId, ()>::new();
    let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(nodes.len());
    for id in nodes.keys() {
        index_of.insert(*id, graph.add_node(*id));
    }
    for edge in edges {
        if let (Some(&s), Some(&t)) = (index_of.get(&edge.source), index_of.get(&edge.target)) {
            graph.add_edge(s, t, ());
        }
    }

    for scc in kosaraju_scc(&graph) {
        if scc.len() > 1 {
            let mut vertices: Vec<NodeId> = scc.into_iter().map(|idx| graph[idx]).collect();
            vertices.sort_unstable();
            return Err(E::Cycle { vertices });
        }
        // A single-node SCC can still be a self-loop.
        if let [idx] = scc[..] {
            if graph.find_edge(idx, idx).is_some() {
                return Err(E::Cycle {
                    vertices: vec![graph[idx]],
                });
            }
        }
    }
    Ok(())
}

/// Pass 4: sources have no inbound edges, sinks have no outbound edges.
fn check_source_sink_edges(nodes: &HashMap<NodeId, NodeDefinition>, edges: &[Edge]) -> Result<(), E> {
    for edge in edges {
        if let Some(source_node) = nodes.get(&edge.source)
            && source_node.kind == NodeKind::Sink
        {
            return Err(E::SinkHasOutbound(edge.source));
        }
        if let Some(target_node) = nodes.get(&edge.target)
            && target_node.kind == NodeKind::Source
        {
            return Err(E::SourceHasInbound(edge.target));
        }
    }
    Ok(())
}

/// Pass 5: an edge's producer output type must equal the consumer's input
/// type. conduit uses exact type-name equality rather than a subtyping
/// relation (Rust has no structural output-to-input variance to model), so
/// "assignable" in spec.md §4.1 reduces to "identical element type name".
fn check_type_compatibility(nodes: &HashMap<NodeId, NodeDefinition>, edges: &[Edge]) -> Result<(), E> {
    for edge in edges {
        let (Some(source_node), Some(target_node)) =
            (nodes.get(&edge.source), nodes.get(&edge.target))
        else {
            continue; // already reported by check_unknown_endpoints
        };
        let (Some(output_type), Some(input_type)) =
            (source_node.output_type, target_node.input_type)
        else {
            continue; // Source->anything or anything->Sink guaranteed by kind
        };
        if output_type != input_type {
            return Err(E::TypeMismatch {
                from: edge.source,
                to: edge.target,
                output_type: output_type.to_string(),
                input_type: input_type.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn detects_cycle_minimal_vertex_set() {
        let a = node(1, NodeKind::Transform, Some("i64"), Some("i64"));
        let b = node(2, NodeKind::Transform, Some("i64"), Some("i64"));
        let c = node(3, NodeKind::Transform, Some("i64"), Some("i64"));
        let mut nodes = HashMap::new();
        let order = vec![a.id, b.id, c.id];
        nodes.insert(a.id, a.clone());
        nodes.insert(b.id, b.clone());
        nodes.insert(c.id, c.clone());
        let edges = vec![
            Edge::new(a.id, b.id),
            Edge::new(b.id, c.id),
            Edge::new(c.id, a.id),
        ];

        let err = validate(&nodes, &order, &edges).unwrap_err();
        match err {
            E::Cycle { mut vertices } => {
                vertices.sort_unstable();
                let mut expected = vec![a.id, b.id, c.id];
                expected.sort_unstable();
                assert_eq!(vertices, expected);
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn detects_type_mismatch() {
        let a = node(1, NodeKind::Source, None, Some("i64"));
        let b = node(2, NodeKind::Sink, Some("String"), None);
        let mut nodes = HashMap::new();
        nodes.insert(a.id, a.clone());
        nodes.insert(b.id, b.clone());
        let edges = vec![Edge::new(a.id, b.id)];

        let err = validate(&nodes, &[a.id, b.id], &edges).unwrap_err();
        assert!(matches!(err, E::TypeMismatch { .. }));
    }

    #[test]
    fn detects_source_has_inbound() {
        let a = node(1, NodeKind::Source, None, Some("i64"));
        let b = node(2, NodeKind::Transform, Some("i64"), Some("i64"));
        let mut nodes = HashMap::new();
        nodes.insert(a.id, a.clone());
        nodes.insert(b.id, b.clone());
        let edges = vec![Edge::new(b.id, a.id)];

        let err = validate(&nodes, &[a.id, b.id], &edges).unwrap_err();
        assert!(matches!(err, E::SourceHasInbound(id) if id == a.id));
    }

    #[test]
    fn detects_unknown_endpoint() {
        let a = node(1, NodeKind::Source, None, Some("i64"));
        let mut nodes = HashMap::new();
        nodes.insert(a.id, a.clone());
        let edges = vec![Edge::new(a.id, NodeId::from_u128(999))];

        let err = validate(&nodes, &[a.id], &edges).unwrap_err();
        assert!(matches!(err, E::UnknownEndpoint(id) if id == NodeId::from_u128(999)));
    }
}
