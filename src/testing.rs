//! In-memory test doubles for nodes and connectors, grounded on
//! `nhubbard_ironbeam::testing` (`mock_io.rs`, `fixtures.rs`,
//! `assertions.rs`): small, dependency-free doubles kept in the library
//! rather than a separate `tests/` helper crate so downstream users can
//! build their own test pipelines against the same doubles conduit tests
//! itself with.

use std::sync::Mutex;

use crate::cancel::Cancel;
use crate::error::Error;
use crate::node_trait::{Sink, Source};
use crate::pipe::DataPipe;

/// A [`Source`] that replays a fixed, in-memory sequence of items.
pub struct VecSource<T> {
    items: Mutex<Vec<T>>,
}

impl<T: Clone + Send + 'static> VecSource<T> {
    /// Creates a source that will emit `items` in order, once.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Source for VecSource<T> {
    type Item = T;

    fn stream(&self, _cancel: Cancel) -> DataPipe<T> {
        let items = std::mem::take(&mut *self.items.lock().unwrap());
        DataPipe::new("vec_source", futures::stream::iter(items))
    }
}

/// A [`Sink`] that records every item it receives, for assertions.
pub struct VecSink<T> {
    received: Mutex<Vec<T>>,
    fail_next: Mutex<usize>,
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail_next: Mutex::new(0),
        }
    }
}

impl<T> VecSink<T> {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `consume` fail, for exercising retry
    /// and dead-letter paths.
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock().unwrap() = count;
    }

    /// Returns every item received so far, in arrival order.
    pub fn received(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.received.lock().unwrap().clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sink configured to fail")]
struct SinkFailure;

#[async_trait::async_trait]
impl<T: Send + 'static> Sink<T> for VecSink<T> {
    async fn consume(&self, item: T) -> Result<(), Error> {
        let mut remaining = self.fail_next.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::ItemProcessing {
                node_id: crate::graph::NodeId::new(),
                message: SinkFailure.to_string(),
            });
        }
        drop(remaining);
        self.received.lock().unwrap().push(item);
        Ok(())
    }
}

/// A manually-advanced clock for deterministic windowing/aggregation tests,
/// independent of wall-clock time.
pub struct ManualClock {
    now: Mutex<jiff::Timestamp>,
}

impl ManualClock {
    /// Creates a clock starting at `start`.
    pub fn new(start: jiff::Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// The clock's current time.
    pub fn now(&self) -> jiff::Timestamp {
        *self.now.lock().unwrap()
    }

    /// Advances the clock by `span`.
    pub fn advance(&self, span: jiff::Span) {
        let mut now = self.now.lock().unwrap();
        *now = now.saturating_add(span).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vec_sink_records_items_in_order() {
        let sink = VecSink::new();
        sink.consume(1).await.unwrap();
        sink.consume(2).await.unwrap();
        assert_eq!(sink.received(), vec![1, 2]);
    }

    #[tokio::test]
    async fn vec_sink_fails_configured_number_of_times() {
        let sink = VecSink::new();
        sink.fail_next(2);
        assert!(sink.consume(1).await.is_err());
        assert!(sink.consume(1).await.is_err());
        assert!(sink.consume(1).await.is_ok());
        assert_eq!(sink.received(), vec![1]);
    }

    #[test]
    fn manual_clock_advances_deterministically() {
        let clock = ManualClock::new(jiff::Timestamp::from_second(0).unwrap());
        clock.advance(jiff::Span::new().seconds(5));
        assert_eq!(clock.now(), jiff::Timestamp::from_second(5).unwrap());
    }
}
