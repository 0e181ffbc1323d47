//! The per-node compiled execution plan.

use std::any::Any;
use std::sync::Arc;

use crate::graph::node::{NodeId, NodeKind};
use crate::pipe::branch::BranchOptions;
use crate::retry::handler::{FailFast, NodeErrorHandler};
use crate::retry::policy::RetryPolicy;
use crate::strategy::ExecutionStrategy;

/// A single node's resolved, ready-to-run configuration, produced by
/// [`super::compiler::compile`].
pub struct NodeExecutionPlan {
    /// The node's id, duplicated here so a plan is self-describing without
    /// needing the originating [`crate::graph::Graph`] in scope.
    pub node_id: NodeId,
    /// The node's human-readable name.
    pub name: String,
    /// The node's kind.
    pub kind: NodeKind,
    /// Resolved execution strategy (meaningful for `Transform` nodes).
    pub execution_strategy: ExecutionStrategy,
    /// Resolved error handler; defaults to [`FailFast`] when the node was
    /// not configured with one (spec.md §4.5 default).
    pub error_handler: Arc<dyn NodeErrorHandler>,
    /// Resolved retry policy, if the node is configured to retry.
    pub retry_policy: Option<RetryPolicy>,
    /// Resolved branch (multicast) options.
    pub branch_options: BranchOptions,
    /// The preconfigured concrete instance registered for this node, if any.
    pub instance: Option<Arc<dyn Any + Send + Sync>>,
}

impl NodeExecutionPlan {
    pub(crate) fn from_definition(
        def: &crate::graph::node::NodeDefinition,
        retry_policy: Option<RetryPolicy>,
        instance: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            node_id: def.id,
            name: def.name.clone(),
            kind: def.kind,
            execution_strategy: def.execution_strategy,
            error_handler: def
                .error_handler
                .clone()
                .unwrap_or_else(|| Arc::new(FailFast)),
            retry_policy,
            branch_options: def.branch_options,
            instance,
        }
    }
}

impl std::fmt::Debug for NodeExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutionPlan")
            .field("node_id", &self.node_id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("execution_strategy", &self.execution_strategy)
            .finish_non_exhaustive()
    }
}
