//! Crate-wide error type.

use std::time::Duration;

use thiserror::Error;

use crate::graph::node::NodeId;

/// Result type for conduit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kinds of [`Error::GraphValidation`], one per validation pass in
/// `GraphBuilder::build`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphValidationError {
    /// Two nodes were registered under the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),
    /// An edge referenced a node id that was never added to the graph.
    #[error("edge endpoint refers to unknown node: {0}")]
    UnknownEndpoint(NodeId),
    /// The graph contains a cycle; `vertices` is the minimal cycle vertex set.
    #[error("graph contains a cycle through {vertices:?}")]
    Cycle {
        /// Node ids participating in the detected cycle.
        vertices: Vec<NodeId>,
    },
    /// A source node declared an inbound edge.
    #[error("source node {0} has inbound edges")]
    SourceHasInbound(NodeId),
    /// A sink node declared an outbound edge.
    #[error("sink node {0} has outbound edges")]
    SinkHasOutbound(NodeId),
    /// An edge connects an output type to an incompatible input type.
    #[error(
        "type mismatch on edge {from} -> {to}: output type `{output_type}` is not assignable to input type `{input_type}`"
    )]
    TypeMismatch {
        /// Source node of the offending edge.
        from: NodeId,
        /// Target node of the offending edge.
        to: NodeId,
        /// Name of the producer's output element type.
        output_type: String,
        /// Name of the consumer's input element type.
        input_type: String,
    },
}

/// Top-level error type for every fallible conduit operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Graph failed validation during `build()`.
    #[error("graph validation failed: {0}")]
    GraphValidation(#[from] GraphValidationError),

    /// A node factory could not instantiate a node.
    #[error("node {node_id} could not be constructed: {message}")]
    NodeConstruction {
        /// Id of the node that failed construction.
        node_id: NodeId,
        /// Underlying message.
        message: String,
    },

    /// A node execution failed after retries were exhausted (or were not
    /// applicable), wrapping the originating error.
    #[error("node {node_id} failed on attempt {attempt}: {source}")]
    NodeExecution {
        /// Id of the failed node.
        node_id: NodeId,
        /// 0-based attempt number at which the error was finally surfaced.
        attempt: u32,
        /// The decision the error handler returned for the final attempt.
        decision: crate::retry::handler::NodeErrorDecision,
        /// The originating error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A node failed while processing a specific item; carries the boxed
    /// item so it can be routed to a dead-letter sink.
    #[error("node {node_id} failed processing an item: {message}")]
    ItemProcessing {
        /// Id of the node that raised the error.
        node_id: NodeId,
        /// Human-readable message describing the failure.
        message: String,
    },

    /// A circuit breaker short-circuited an invocation because its state is
    /// `Open`.
    #[error("circuit breaker for node {node_id} is open (reopen in {retry_after:?})")]
    CircuitOpen {
        /// Node guarded by the open breaker.
        node_id: NodeId,
        /// Time remaining until the breaker transitions to half-open.
        retry_after: Duration,
    },

    /// A node operation exceeded its configured timeout.
    #[error("node {node_id} timed out after {elapsed:?}")]
    NodeTimeout {
        /// Node that timed out.
        node_id: NodeId,
        /// Elapsed time before the timeout fired.
        elapsed: Duration,
    },

    /// The run was cancelled via its cancellation token.
    #[error("run was cancelled")]
    Cancellation,

    /// A configuration value was invalid (e.g. `Parallel(n)` with `n < 2`).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No storage provider is registered for a URI scheme.
    #[error("unsupported storage scheme: {0}")]
    UnsupportedStorageScheme(String),

    /// A storage provider was requested but none is registered.
    #[error("no storage provider registered for scheme: {0}")]
    StorageProviderNotFound(String),
}

impl Error {
    /// Returns the node id this error is attributed to, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Error::NodeConstruction { node_id, .. }
            | Error::NodeExecution { node_id, .. }
            | Error::ItemProcessing { node_id, .. }
            | Error::CircuitOpen { node_id, .. }
            | Error::NodeTimeout { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }

    /// Returns `true` if this error represents a cancellation rather than a
    /// processing failure, so callers can distinguish the two per spec.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancellation)
    }
}
