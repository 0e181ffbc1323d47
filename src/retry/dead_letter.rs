//! Dead-letter routing (spec.md §4.5): where items land when a
//! [`super::NodeErrorDecision::DeadLetter`] is returned.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;

use crate::graph::node::NodeId;

/// A single dead-lettered item plus the diagnostic context needed to
/// reprocess or inspect it later.
pub struct DeadLetterEnvelope {
    /// The node that produced the failure.
    pub node_id: NodeId,
    /// The original item, type-erased the same way as
    /// [`super::handler::NodeErrorHandler::handle`]'s `item` parameter.
    pub item: Arc<dyn Any + Send + Sync>,
    /// `std::any::type_name` of the concrete exception, for diagnostics.
    pub exception_type: &'static str,
    /// `Display` rendering of the error.
    pub exception_message: String,
    /// 0-based count of attempts already made when the item was
    /// dead-lettered, matching [`super::RetryPolicy::should_retry`]'s
    /// counter. A policy with `max_attempts: 3` exhausts after attempts
    /// 0, 1 and 2, so this field reads `2` for that policy (spec.md §4.5,
    /// scenario S5's "attempt=3" describes the same exhaustion point
    /// counted from one).
    pub attempt: u32,
    /// When the failure occurred.
    pub timestamp: Timestamp,
    /// Correlates this envelope with the run or item lineage that produced
    /// it, e.g. for joining against source connector logs.
    pub correlation_id: Option<String>,
    /// Free-form connector/source metadata (partition, offset, file path…).
    pub metadata: HashMap<String, String>,
}

impl std::fmt::Debug for DeadLetterEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterEnvelope")
            .field("node_id", &self.node_id)
            .field("exception_type", &self.exception_type)
            .field("exception_message", &self.exception_message)
            .field("timestamp", &self.timestamp)
            .field("correlation_id", &self.correlation_id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Sink for dead-lettered items. Kept trait-only: concrete backends (a
/// topic, a table, a file) are connector concerns outside this crate's
/// scope.
#[async_trait::async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Accepts one envelope. Implementations should not panic on failure to
    /// persist — a dead-letter sink that itself fails should log and drop
    /// rather than halt the run it is trying to keep alive.
    async fn accept(&self, envelope: DeadLetterEnvelope);
}

/// An in-memory dead-letter sink useful for tests and small embedded runs.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    envelopes: std::sync::Mutex<Vec<DeadLetterEnvelope>>,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns every envelope accepted so far.
    pub fn drain(&self) -> Vec<DeadLetterEnvelope> {
        std::mem::take(&mut self.envelopes.lock().unwrap())
    }

    /// Number of envelopes currently buffered.
    pub fn len(&self) -> usize {
        self.envelopes.lock().unwrap().len()
    }

    /// Whether no envelopes have been accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn accept(&self, envelope: DeadLetterEnvelope) {
        self.envelopes.lock().unwrap().push(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_buffers_and_drains() {
        let sink = InMemoryDeadLetterSink::new();
        let envelope = DeadLetterEnvelope {
            node_id: NodeId::from_u128(1),
            item: Arc::new(42i32),
            exception_type: "Boom",
            exception_message: "boom".to_string(),
            attempt: 0,
            timestamp: Timestamp::now(),
            correlation_id: Some("corr-1".to_string()),
            metadata: HashMap::new(),
        };
        sink.accept(envelope).await;
        assert_eq!(sink.len(), 1);
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert!(sink.is_empty());
    }
}
