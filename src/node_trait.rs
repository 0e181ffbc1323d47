//! The five pluggable node interfaces implementers provide (spec.md §6).
//!
//! These are deliberately plain, synchronous-where-possible traits: the
//! engine (`runner`, `join`, `aggregate`) owns concurrency, windowing and
//! backpressure, so implementers only describe per-item behavior.

use crate::error::Error;

/// Produces items with no upstream dependency.
pub trait Source: Send + Sync {
    /// The element type this source produces.
    type Item: Send + 'static;

    /// Produces the source's output as a stream, driven until `cancel`
    /// fires or the underlying connector is exhausted.
    fn stream(&self, cancel: crate::cancel::Cancel) -> crate::pipe::DataPipe<Self::Item>;
}

/// Maps one input item to zero, one, or many output items.
#[async_trait::async_trait]
pub trait Transform<TIn, TOut>: Send + Sync
where
    TIn: Send + 'static,
    TOut: Send + 'static,
{
    /// Transforms a single item. An empty `Vec` drops the item; multiple
    /// entries fan it out to several downstream items.
    async fn apply(&self, item: TIn) -> Result<Vec<TOut>, Error>;
}

/// Combines two same-keyed items from different input streams.
pub trait Join<T, K, Out>: Send + Sync {
    /// Extracts the join key from an item.
    fn key(&self, item: &T) -> K;
    /// Combines one matched pair into an output item.
    fn combine(&self, left: T, right: T) -> Out;
}

/// Accumulates keyed, windowed groups of items into an output.
pub trait Aggregate<T, K, A>: Send + Sync {
    /// The type emitted once a window closes.
    type Out: Send + 'static;

    /// Extracts the grouping key from an item.
    fn get_key(&self, item: &T) -> K;
    /// Creates a fresh accumulator for a new key/window pair.
    fn create_accumulator(&self) -> A;
    /// Folds one item into an accumulator.
    fn accumulate(&self, acc: &mut A, item: T);
    /// Produces the final output for a closed window.
    fn emit(&self, key: K, acc: A) -> Self::Out;
}

/// Consumes items with no downstream.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Consumes a single item, returning an error to trigger the node's
    /// configured [`crate::retry::NodeErrorHandler`].
    async fn consume(&self, item: T) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DoubleTransform;

    #[async_trait::async_trait]
    impl Transform<i32, i32> for DoubleTransform {
        async fn apply(&self, item: i32) -> Result<Vec<i32>, Error> {
            Ok(vec![item * 2])
        }
    }

    #[tokio::test]
    async fn transform_can_fan_out_and_drop() {
        let t = DoubleTransform;
        assert_eq!(t.apply(3).await.unwrap(), vec![6]);
    }

    struct EvenOddJoin;

    impl Join<i32, bool, i32> for EvenOddJoin {
        fn key(&self, item: &i32) -> bool {
            item % 2 == 0
        }
        fn combine(&self, left: i32, right: i32) -> i32 {
            left + right
        }
    }

    #[test]
    fn join_keys_and_combines() {
        let j = EvenOddJoin;
        assert_eq!(j.key(&4), true);
        assert_eq!(j.combine(4, 6), 10);
    }
}
