//! Node identifiers and node definitions.
//!
//! Grounded on `nvisy_runtime::definition::node::{NodeId, Node, NodeKind}`:
//! a UUIDv7 newtype id with `Display`/`From`/`Into` derived via
//! `derive_more`, and a node-kind tag carrying per-kind configuration.

use std::str::FromStr;

use derive_more::{Debug as DeriveDebug, Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::handler::NodeErrorHandler;
use crate::retry::policy::RetryPolicy;
use crate::strategy::ExecutionStrategy;

/// Unique identifier for a node in a [`crate::graph::Graph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(DeriveDebug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Creates a new random (time-ordered) node id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a node id from an existing UUID. Used by tests that need
    /// deterministic ids.
    #[inline]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic node id from a small integer, for tests.
    pub const fn from_u128(n: u128) -> Self {
        Self(Uuid::from_u128(n))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Which of the five node kinds a [`NodeDefinition`] declares.
///
/// Input/output element types are carried as type names (captured at
/// wiring time by the builder's typed handles) rather than as Rust
/// generics on this enum, so that a [`crate::graph::Graph`] can be a single
/// concrete, non-generic value holding arbitrarily-typed nodes — mirroring
/// spec.md §9's "typed ports without runtime reflection in the hot path"
/// design note: the builder captures type parameters at wiring time and the
/// compiler binds monomorphic delegates once per graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// Produces items; has no inbound edges.
    Source,
    /// Maps one item to zero/one/many items.
    Transform,
    /// Combines multiple input streams into one.
    Join,
    /// Accumulates items into time-bounded, keyed groups.
    Aggregate,
    /// Consumes items; has no outbound edges.
    Sink,
}

impl NodeKind {
    /// `true` for [`NodeKind::Source`].
    pub const fn is_source(self) -> bool {
        matches!(self, NodeKind::Source)
    }

    /// `true` for [`NodeKind::Sink`].
    pub const fn is_sink(self) -> bool {
        matches!(self, NodeKind::Sink)
    }
}

/// A frozen description of one node, as stored on a built [`crate::graph::Graph`].
///
/// `input_type`/`output_type` are the element type names captured by the
/// builder's typed handles (e.g. `"i64"`, `"orders::Order"`); `NodeDefinition`
/// itself never holds live Rust type parameters, only their names, so that a
/// `Graph` remains a plain, non-generic value (spec.md §3 invariant:
/// "input type nil iff kind=Source; output type nil iff kind=Sink").
#[derive(Clone)]
pub struct NodeDefinition {
    /// Graph-unique, non-empty node id.
    pub id: NodeId,
    /// Human-readable name, defaults to the id's string form if unset.
    pub name: String,
    /// The node's kind.
    pub kind: NodeKind,
    /// Name of the element type flowing into this node; `None` iff `kind == Source`.
    pub input_type: Option<&'static str>,
    /// Name of the element type flowing out of this node; `None` iff `kind == Sink`.
    pub output_type: Option<&'static str>,
    /// Execution strategy (meaningful for `Transform` nodes); defaults to `Sequential`.
    pub execution_strategy: ExecutionStrategy,
    /// Per-node error handler, if configured; unconfigured nodes use the
    /// default `Fail`-on-error handler described in spec.md §4.5.
    pub error_handler: Option<std::sync::Arc<dyn NodeErrorHandler>>,
    /// Per-node retry policy, consulted only when the error handler
    /// returns `NodeErrorDecision::Retry`; nodes with no policy convert a
    /// `Retry` decision straight to `Fail`.
    pub retry_policy: Option<RetryPolicy>,
    /// Branching (multicast) options applied when this node's output pipe
    /// has more than one consumer.
    pub branch_options: crate::pipe::branch::BranchOptions,
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("execution_strategy", &self.execution_strategy)
            .field(
                "error_handler",
                &self.error_handler.as_ref().map(|_| "<error handler>"),
            )
            .field("retry_policy", &self.retry_policy)
            .field("branch_options", &self.branch_options)
            .finish()
    }
}

impl NodeDefinition {
    /// Validates the `input_type nil iff Source` / `output_type nil iff Sink`
    /// invariant from spec.md §3. Called by `GraphBuilder::build`.
    pub(crate) fn check_port_invariant(&self) -> bool {
        let input_ok = self.input_type.is_none() == matches!(self.kind, NodeKind::Source);
        let output_ok = self.output_type.is_none() == matches!(self.kind, NodeKind::Sink);
        input_ok && output_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_roundtrips_through_string() {
        let id = NodeId::new();
        let s = id.to_string();
        let parsed: NodeId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn node_id_from_u128_is_deterministic() {
        assert_eq!(NodeId::from_u128(7), NodeId::from_u128(7));
        assert_ne!(NodeId::from_u128(7), NodeId::from_u128(8));
    }

    #[test]
    fn node_kind_predicates() {
        assert!(NodeKind::Source.is_source());
        assert!(!NodeKind::Source.is_sink());
        assert!(NodeKind::Sink.is_sink());
    }
}
