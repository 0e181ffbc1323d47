//! Shared run-scoped state passed to nodes and error handlers (spec.md §4.6).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::node::NodeId;

/// Per-run state checkpointing, consulted by a [`Runner`](crate::runner)
/// to resume a partially-completed run. Kept trait-only: a concrete
/// store (file, database, object storage) is a connector concern.
#[async_trait::async_trait]
pub trait StateManager: Send + Sync {
    /// Persists a snapshot of completed/errored node ids for this run.
    async fn snapshot(&self, run_id: &str, completed: &[NodeId], errored: &[NodeId]);
    /// Attempts to restore a prior snapshot for `run_id`, returning the
    /// previously completed and errored node ids, if any were recorded.
    async fn try_restore(&self, run_id: &str) -> Option<(Vec<NodeId>, Vec<NodeId>)>;
    /// Marks a single node as completed for `run_id`.
    async fn mark_node_completed(&self, run_id: &str, node_id: NodeId);
    /// Marks a single node as errored for `run_id`.
    async fn mark_node_error(&self, run_id: &str, node_id: NodeId);
}

/// Run-scoped context threaded through node execution and error handlers.
///
/// Mirrors the parameter/attribute bag shape of `nvisy_runtime::engine`'s
/// execution context, generalized here to carry arbitrary typed items
/// (results produced by upstream nodes that downstream nodes or handlers
/// may want to inspect) alongside string parameters.
#[derive(Clone)]
pub struct PipelineContext {
    parameters: HashMap<String, serde_json::Value>,
    items: HashMap<String, Arc<dyn Any + Send + Sync>>,
    state_manager: Option<Arc<dyn StateManager>>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    /// Creates an empty context with no state manager.
    pub fn new() -> Self {
        Self {
            parameters: HashMap::new(),
            items: HashMap::new(),
            state_manager: None,
        }
    }

    /// Creates an empty context backed by the given state manager.
    pub fn with_state_manager(state_manager: Arc<dyn StateManager>) -> Self {
        Self {
            parameters: HashMap::new(),
            items: HashMap::new(),
            state_manager: Some(state_manager),
        }
    }

    /// Sets a parameter, returning `self` for chained construction.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Reads a parameter set via [`Self::with_parameter`].
    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.get(key)
    }

    /// Stores a typed item under `key` for downstream nodes to read back.
    pub fn put_item<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.items.insert(key.into(), Arc::new(value));
    }

    /// Reads back a typed item stored via [`Self::put_item`].
    pub fn item<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.items
            .get(key)
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// The configured state manager, if any.
    pub fn state_manager(&self) -> Option<&Arc<dyn StateManager>> {
        self.state_manager.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_round_trip() {
        let ctx = PipelineContext::new().with_parameter("batch_size", 64);
        assert_eq!(ctx.parameter("batch_size"), Some(&serde_json::json!(64)));
        assert_eq!(ctx.parameter("missing"), None);
    }

    #[test]
    fn items_round_trip_by_type() {
        let mut ctx = PipelineContext::new();
        ctx.put_item("count", 42i32);
        assert_eq!(ctx.item::<i32>("count").map(|v| *v), Some(42));
        assert!(ctx.item::<String>("count").is_none());
    }
}
