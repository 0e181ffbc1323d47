//! Type-erased per-node execution delegates.
//!
//! A [`crate::graph::Graph`] only carries type *names*; the concrete logic
//! for each node is supplied separately as a [`NodeBehavior`], keyed by
//! node id, the same `Arc<dyn Any + Send + Sync>` erasure idiom used for
//! [`crate::retry::NodeErrorHandler`]'s item parameter and
//! `GraphBuilder::add_preconfigured_node_instance`.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::ack::{AckStrategy, AcknowledgableMessage};
use crate::cancel::Cancel;
use crate::error::Error;
use crate::pipe::DataPipe;

/// An item flowing through the erased runner layer.
pub type ErasedItem = Arc<dyn Any + Send + Sync>;
/// A stream of erased items.
pub type ErasedPipe = DataPipe<ErasedItem>;
/// A boxed future, for trait-object-friendly async closures.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The executable logic registered for one node id.
///
/// `Join`/`Aggregate` nodes are modeled as [`NodeBehavior::FanIn`]: they
/// consume every predecessor pipe and resolve to a finished `Vec` rather
/// than a live stream, matching [`crate::join::run`] and
/// [`crate::aggregate::WindowedAggregator`]'s own batch-oriented shapes.
#[derive(Clone)]
pub enum NodeBehavior {
    /// Produces the node's output stream.
    Source(Arc<dyn Fn(Cancel) -> ErasedPipe + Send + Sync>),
    /// Maps one input item to zero, one, or many output items.
    Transform(Arc<dyn Fn(ErasedItem) -> BoxFuture<Result<Vec<ErasedItem>, Error>> + Send + Sync>),
    /// Combines every predecessor pipe into a finished item list.
    FanIn(Arc<dyn Fn(Vec<ErasedPipe>) -> BoxFuture<Vec<ErasedItem>> + Send + Sync>),
    /// Consumes one item.
    Sink(Arc<dyn Fn(ErasedItem) -> BoxFuture<Result<(), Error>> + Send + Sync>),
}

/// Recovers a concrete `T` from an `Arc<T>` received off the erased layer.
/// Fan-out clones the `Arc` rather than the value, so the common
/// single-consumer case hits `try_unwrap`; a fanned-out item falls back to
/// cloning the value itself.
fn unerase<T: Clone + Send + Sync + 'static>(item: Arc<T>) -> T {
    Arc::try_unwrap(item).unwrap_or_else(|arc| (*arc).clone())
}

/// Wraps a concrete [`crate::node_trait::Source`] as an erased [`NodeBehavior::Source`].
pub fn erase_source<S>(source: Arc<S>) -> NodeBehavior
where
    S: crate::node_trait::Source + 'static,
    S::Item: Send + Sync + 'static,
{
    NodeBehavior::Source(Arc::new(move |cancel| {
        let pipe = source.stream(cancel);
        DataPipe::new(
            "source",
            futures::stream::StreamExt::map(pipe.into_inner(), |item| -> ErasedItem {
                Arc::new(item)
            }),
        )
    }))
}

/// Wraps a concrete [`crate::node_trait::Transform`] as an erased
/// [`NodeBehavior::Transform`]. An item that fails to downcast to `TIn` is
/// a wiring bug (a `Transform` was registered against a node whose
/// upstream produces a different type than its declared `input_type`) and
/// is reported as [`Error::Configuration`] rather than panicking.
pub fn erase_transform<T, TIn, TOut>(transform: Arc<T>) -> NodeBehavior
where
    T: crate::node_trait::Transform<TIn, TOut> + 'static,
    TIn: Clone + Send + Sync + 'static,
    TOut: Send + Sync + 'static,
{
    NodeBehavior::Transform(Arc::new(move |item: ErasedItem| {
        let transform = Arc::clone(&transform);
        Box::pin(async move {
            let typed: Arc<TIn> = item.downcast().map_err(|_| {
                Error::Configuration("transform received an item of an unexpected type".into())
            })?;
            let outputs = transform.apply(unerase(typed)).await?;
            Ok(outputs
                .into_iter()
                .map(|o| Arc::new(o) as ErasedItem)
                .collect())
        })
    }))
}

/// Wraps a concrete [`crate::node_trait::Sink`] as an erased [`NodeBehavior::Sink`].
pub fn erase_sink<K, T>(sink: Arc<K>) -> NodeBehavior
where
    K: crate::node_trait::Sink<T> + 'static,
    T: Clone + Send + Sync + 'static,
{
    NodeBehavior::Sink(Arc::new(move |item: ErasedItem| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            let typed: Arc<T> = item.downcast().map_err(|_| {
                Error::Configuration("sink received an item of an unexpected type".into())
            })?;
            sink.consume(unerase(typed)).await
        })
    }))
}

/// Wraps a concrete [`crate::node_trait::Sink`] over [`AcknowledgableMessage<T>`]
/// as an erased [`NodeBehavior::Sink`] that also drives `strategy` once
/// `sink.consume` resolves (spec.md §4.6). Use [`erase_sink`] instead for
/// [`AckStrategy::Manual`] sinks that call `acknowledge()`/`cancel()`
/// themselves; this function exists so the other three strategies are
/// actually reachable rather than only declared.
pub fn erase_ack_sink<K, T>(sink: Arc<K>, strategy: AckStrategy) -> NodeBehavior
where
    K: crate::node_trait::Sink<AcknowledgableMessage<T>> + 'static,
    T: Clone + Send + Sync + 'static,
{
    let batch: Arc<AsyncMutex<Vec<AcknowledgableMessage<T>>>> = Arc::new(AsyncMutex::new(Vec::new()));

    if let AckStrategy::Batch { max_batch_delay, .. } = strategy {
        let batch = Arc::clone(&batch);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_batch_delay.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let pending = std::mem::take(&mut *batch.lock().await);
                for message in pending {
                    message.acknowledge().await;
                }
            }
        });
    }

    NodeBehavior::Sink(Arc::new(move |item: ErasedItem| {
        let sink = Arc::clone(&sink);
        let batch = Arc::clone(&batch);
        Box::pin(async move {
            let typed: Arc<AcknowledgableMessage<T>> = item.downcast().map_err(|_| {
                Error::Configuration("sink received an item of an unexpected type".into())
            })?;
            let ack_handle = (*typed).clone();
            let message = unerase(typed);
            let result = sink.consume(message).await;
            match (&result, strategy) {
                (Ok(()), AckStrategy::Manual) => {}
                (Ok(()), AckStrategy::AutoOnSinkSuccess) => {
                    ack_handle.acknowledge().await;
                }
                (Ok(()), AckStrategy::Delayed { ms, .. }) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        ack_handle.acknowledge().await;
                    });
                }
                (Ok(()), AckStrategy::Batch { max_batch_size, .. }) => {
                    let mut pending = batch.lock().await;
                    pending.push(ack_handle);
                    if pending.len() >= max_batch_size {
                        let flushed = std::mem::take(&mut *pending);
                        drop(pending);
                        for message in flushed {
                            message.acknowledge().await;
                        }
                    }
                }
                (Err(_), AckStrategy::Delayed { cancel_on_failure: true, .. }) => {
                    ack_handle.cancel().await;
                }
                (Err(_), _) => {}
            }
            result
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct RecordingSink(Arc<std::sync::Mutex<Vec<i32>>>);

    #[async_trait::async_trait]
    impl crate::node_trait::Sink<AcknowledgableMessage<i32>> for RecordingSink {
        async fn consume(&self, item: AcknowledgableMessage<i32>) -> Result<(), Error> {
            self.0.lock().unwrap().push(*item.body());
            Ok(())
        }
    }

    #[tokio::test]
    async fn auto_on_sink_success_acknowledges_after_consume() {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink(Arc::clone(&received)));
        let behavior = erase_ack_sink(sink, AckStrategy::AutoOnSinkSuccess);
        let NodeBehavior::Sink(consume) = behavior else {
            panic!("expected NodeBehavior::Sink");
        };
        let message = AcknowledgableMessage::new(7);
        let handle = message.clone();
        let item: ErasedItem = Arc::new(message);
        consume(item).await.unwrap();
        assert!(handle.is_acknowledged().await);
        assert_eq!(*received.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn batch_strategy_flushes_once_full() {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink(Arc::clone(&received)));
        let behavior = erase_ack_sink(
            sink,
            AckStrategy::Batch {
                max_batch_size: 2,
                max_batch_delay: Duration::from_secs(60),
            },
        );
        let NodeBehavior::Sink(consume) = behavior else {
            panic!("expected NodeBehavior::Sink");
        };

        let first = AcknowledgableMessage::new(1);
        let first_handle = first.clone();
        consume(Arc::new(first) as ErasedItem).await.unwrap();
        assert!(!first_handle.is_acknowledged().await);

        let second = AcknowledgableMessage::new(2);
        let second_handle = second.clone();
        consume(Arc::new(second) as ErasedItem).await.unwrap();

        assert!(first_handle.is_acknowledged().await);
        assert!(second_handle.is_acknowledged().await);
        assert_eq!(*received.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn stream_of_erased_items_flows_through_consume() {
        // Exercises the erased Fn closure through a stream the same way
        // `run_sink` drives it, rather than calling it once in isolation.
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink(Arc::clone(&received)));
        let behavior = erase_ack_sink(sink, AckStrategy::Manual);
        let NodeBehavior::Sink(consume) = behavior else {
            panic!("expected NodeBehavior::Sink");
        };
        let items: Vec<ErasedItem> = (0..3)
            .map(|n| Arc::new(AcknowledgableMessage::new(n)) as ErasedItem)
            .collect();
        let mut stream = futures::stream::iter(items);
        while let Some(item) = stream.next().await {
            consume(item).await.unwrap();
        }
        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2]);
    }
}
