//! Message acknowledgment (spec.md §4.6).
//!
//! Grounded in the same "shared in-flight completion" idiom used elsewhere
//! in conduit's concurrency primitives (e.g. [`crate::pipe::branch`]'s
//! atomic in-flight counters): acknowledgment state lives behind a
//! `tokio::sync::Mutex` so `acknowledge()` is safely callable from multiple
//! tasks and is idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// How a node's successfully-processed items get acknowledged back to
/// their source.
#[derive(Debug, Clone, Copy)]
pub enum AckStrategy {
    /// The node implementation calls `acknowledge()` itself.
    Manual,
    /// The runner acknowledges automatically once the sink accepts the item.
    AutoOnSinkSuccess,
    /// The runner schedules an acknowledgment `ms` after the item reaches
    /// the sink. Per spec.md §9 (recorded in `DESIGN.md`), the scheduled ack
    /// is cancelled if the sink fails before the delay elapses, unless
    /// `cancel_on_failure` is `false`.
    Delayed { ms: u64, cancel_on_failure: bool },
    /// Acks are batched: flushed once `max_batch_size` accumulate or
    /// `max_batch_delay` elapses since the oldest unacked item in the batch,
    /// whichever comes first.
    Batch {
        max_batch_size: usize,
        max_batch_delay: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckState {
    Pending,
    Acked,
    Cancelled,
}

struct Inner {
    state: Mutex<AckState>,
}

/// A message paired with the machinery needed to acknowledge it exactly
/// once, regardless of how many call sites hold a clone of the handle.
#[derive(Clone)]
pub struct AcknowledgableMessage<T> {
    body: T,
    inner: Arc<Inner>,
}

impl<T> AcknowledgableMessage<T> {
    /// Wraps `body` with fresh, unacknowledged tracking state.
    pub fn new(body: T) -> Self {
        Self {
            body,
            inner: Arc::new(Inner {
                state: Mutex::new(AckState::Pending),
            }),
        }
    }

    /// Returns a new message sharing this one's ack-tracking state but
    /// carrying a different body — used when a transform maps one message
    /// to another while preserving its acknowledgment lineage.
    pub fn with_body<U>(&self, body: U) -> AcknowledgableMessage<U> {
        AcknowledgableMessage {
            body,
            inner: Arc::clone(&self.inner),
        }
    }

    /// The message's payload.
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Consumes the handle, returning the payload.
    pub fn into_body(self) -> T {
        self.body
    }

    /// Marks the message acknowledged. Idempotent: a second call is a no-op
    /// and returns `false`.
    pub async fn acknowledge(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if *state == AckState::Pending {
            *state = AckState::Acked;
            true
        } else {
            false
        }
    }

    /// Cancels a pending acknowledgment (used by `Delayed` when the sink
    /// fails before the delay elapses). A no-op if already acked.
    pub async fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if *state == AckState::Pending {
            *state = AckState::Cancelled;
            true
        } else {
            false
        }
    }

    /// Whether the message has been acknowledged.
    pub async fn is_acknowledged(&self) -> bool {
        *self.inner.state.lock().await == AckState::Acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let msg = AcknowledgableMessage::new(42);
        assert!(msg.acknowledge().await);
        assert!(!msg.acknowledge().await);
        assert!(msg.is_acknowledged().await);
    }

    #[tokio::test]
    async fn with_body_shares_ack_state() {
        let msg = AcknowledgableMessage::new(42);
        let mapped = msg.with_body("forty-two");
        mapped.acknowledge().await;
        assert!(msg.is_acknowledged().await);
    }

    #[tokio::test]
    async fn cancel_prevents_later_acknowledge() {
        let msg = AcknowledgableMessage::new(42);
        assert!(msg.cancel().await);
        assert!(!msg.acknowledge().await);
        assert!(!msg.is_acknowledged().await);
    }
}
