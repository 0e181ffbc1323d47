//! Per-node error handlers and decisions (spec.md §4.5).

use std::any::Any;
use std::error::Error as StdError;

use crate::context::PipelineContext;
use crate::graph::node::NodeId;

/// The outcome a [`NodeErrorHandler`] returns for a single failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum NodeErrorDecision {
    /// Drop the item and continue processing the stream.
    Skip,
    /// Retry the item under the node's [`super::RetryPolicy`].
    Retry,
    /// Record a failure on the run result and halt the run.
    Fail,
    /// Route the item to the configured dead-letter sink and continue.
    DeadLetter,
}

/// Maps `(node, failed item, error, context)` to a [`NodeErrorDecision`].
///
/// The item is type-erased as `&dyn Any` so a single trait object can be
/// stored on a [`crate::graph::node::NodeDefinition`] regardless of the
/// node's concrete item type — the same type-erasure idiom used for
/// partitions in `nhubbard_ironbeam::node::Node` (`Box<dyn Any + Send +
/// Sync>`), applied here to keep `NodeErrorHandler` object-safe.
#[async_trait::async_trait]
pub trait NodeErrorHandler: Send + Sync {
    /// Decides how to handle one item-processing failure.
    async fn handle(
        &self,
        node_id: NodeId,
        item: &(dyn Any + Send + Sync),
        error: &(dyn StdError + Send + Sync),
        context: &PipelineContext,
    ) -> NodeErrorDecision;
}

/// The default handler used by nodes with no configured
/// [`NodeErrorHandler`]: spec.md §4.5 "Default decision for unhandled
/// exceptions is `Fail`."
pub struct FailFast;

#[async_trait::async_trait]
impl NodeErrorHandler for FailFast {
    async fn handle(
        &self,
        _node_id: NodeId,
        _item: &(dyn Any + Send + Sync),
        _error: &(dyn StdError + Send + Sync),
        _context: &PipelineContext,
    ) -> NodeErrorDecision {
        NodeErrorDecision::Fail
    }
}

/// A handler that always returns a fixed decision, useful for tests and for
/// nodes that want unconditional skip/dead-letter semantics.
pub struct Always(pub NodeErrorDecision);

#[async_trait::async_trait]
impl NodeErrorHandler for Always {
    async fn handle(
        &self,
        _node_id: NodeId,
        _item: &(dyn Any + Send + Sync),
        _error: &(dyn StdError + Send + Sync),
        _context: &PipelineContext,
    ) -> NodeErrorDecision {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;
    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }
    impl StdError for Boom {}

    #[tokio::test]
    async fn fail_fast_always_fails() {
        let handler = FailFast;
        let item: i32 = 1;
        let ctx = PipelineContext::new();
        let decision = handler
            .handle(NodeId::new(), &item, &Boom, &ctx)
            .await;
        assert_eq!(decision, NodeErrorDecision::Fail);
    }

    #[tokio::test]
    async fn always_returns_configured_decision() {
        let handler = Always(NodeErrorDecision::DeadLetter);
        let item: i32 = 1;
        let ctx = PipelineContext::new();
        let decision = handler
            .handle(NodeId::new(), &item, &Boom, &ctx)
            .await;
        assert_eq!(decision, NodeErrorDecision::DeadLetter);
    }
}
