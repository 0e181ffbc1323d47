//! Transform execution strategies (spec.md §4.3).
//!
//! The closest teacher shape is `nhubbard_ironbeam::runner::ExecMode`
//! (`Sequential` vs. `Parallel { threads, partitions }`), adapted here from
//! a batch/rayon split into an async per-item concurrency policy driven by
//! `tokio::task::JoinSet`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::task::JoinSet;

use crate::cancel::Cancel;
use crate::error::Error;

/// Per-node item-level concurrency policy for `Transform` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Items processed one at a time, in input order; output order =
    /// input order.
    Sequential,
    /// Up to `n` items in flight; output order is not preserved.
    Parallel(usize),
    /// Up to `n` items in flight; output re-ordered to match input
    /// arrival order via a per-slot reorder buffer.
    OrderedParallel(usize),
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::Sequential
    }
}

impl ExecutionStrategy {
    /// Validates the strategy at graph-build time, per spec.md §7:
    /// `ConfigurationError` when `Parallel`/`OrderedParallel` carry `n < 2`.
    pub fn validate(self) -> Result<(), Error> {
        match self {
            ExecutionStrategy::Sequential => Ok(()),
            ExecutionStrategy::Parallel(n) | ExecutionStrategy::OrderedParallel(n) if n >= 2 => {
                Ok(())
            }
            ExecutionStrategy::Parallel(n) | ExecutionStrategy::OrderedParallel(n) => {
                Err(Error::Configuration(format!(
                    "execution strategy requires max degree of parallelism >= 2, got {n}"
                )))
            }
        }
    }

    /// Applies this strategy to a transform function, producing the output
    /// stream. `f` is the per-item transform delegate bound by the
    /// execution plan; cancellation propagates into in-flight item tasks
    /// via `cancel`, per spec.md §4.3.
    pub fn apply<In, Out, F, Fut>(
        self,
        input: Pin<Box<dyn Stream<Item = In> + Send>>,
        f: F,
        cancel: Cancel,
    ) -> Pin<Box<dyn Stream<Item = Out> + Send>>
    where
        In: Send + 'static,
        Out: Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
    {
        match self {
            ExecutionStrategy::Sequential => {
                Box::pin(sequential(input, std::sync::Arc::new(f), cancel))
            }
            ExecutionStrategy::Parallel(n) => {
                Box::pin(parallel(input, std::sync::Arc::new(f), n, cancel))
            }
            ExecutionStrategy::OrderedParallel(n) => {
                Box::pin(ordered_parallel(input, std::sync::Arc::new(f), n, cancel))
            }
        }
    }
}

fn sequential<In, Out, F, Fut>(
    mut input: Pin<Box<dyn Stream<Item = In> + Send>>,
    f: std::sync::Arc<F>,
    cancel: Cancel,
) -> impl Stream<Item = Out> + Send
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send + 'static,
{
    async_stream::stream! {
        while let Some(item) = input.next().await {
            if cancel.is_cancelled() {
                break;
            }
            yield f(item).await;
        }
    }
}

fn parallel<In, Out, F, Fut>(
    mut input: Pin<Box<dyn Stream<Item = In> + Send>>,
    f: std::sync::Arc<F>,
    max_in_flight: usize,
    cancel: Cancel,
) -> impl Stream<Item = Out> + Send
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send + 'static,
{
    async_stream::stream! {
        let mut tasks: JoinSet<Out> = JoinSet::new();
        loop {
            while tasks.len() < max_in_flight && !cancel.is_cancelled() {
                match input.next().await {
                    Some(item) => {
                        let f = std::sync::Arc::clone(&f);
                        tasks.spawn(async move { f(item).await });
                    }
                    None => break,
                }
            }
            if tasks.is_empty() {
                break;
            }
            match tasks.join_next().await {
                Some(Ok(out)) => yield out,
                Some(Err(_join_err)) => continue,
                None => break,
            }
            if cancel.is_cancelled() && tasks.is_empty() {
                break;
            }
        }
    }
}

fn ordered_parallel<In, Out, F, Fut>(
    mut input: Pin<Box<dyn Stream<Item = In> + Send>>,
    f: std::sync::Arc<F>,
    max_in_flight: usize,
    cancel: Cancel,
) -> impl Stream<Item = Out> + Send
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send + 'static,
{
    async_stream::stream! {
        // Reorder buffer keyed by arrival sequence number: a slot holds
        // `None` while its task is still in flight and `Some(out)` once
        // it completes, so results can be emitted strictly in input order
        // even though tasks may finish out of order.
        let mut tasks: JoinSet<(u64, Out)> = JoinSet::new();
        let mut next_seq: u64 = 0;
        let mut next_to_emit: u64 = 0;
        let mut pending: VecDeque<(u64, Out)> = VecDeque::new();
        let mut input_exhausted = false;

        loop {
            while !input_exhausted && tasks.len() < max_in_flight && !cancel.is_cancelled() {
                match input.next().await {
                    Some(item) => {
                        let seq = next_seq;
                        next_seq += 1;
                        let f = std::sync::Arc::clone(&f);
                        tasks.spawn(async move { (seq, f(item).await) });
                    }
                    None => {
                        input_exhausted = true;
                        break;
                    }
                }
            }

            if let Some(pos) = (0..pending.len()).find(|&i| pending[i].0 == next_to_emit) {
                let (_, out) = pending.remove(pos).unwrap();
                next_to_emit += 1;
                yield out;
                continue;
            }

            if tasks.is_empty() {
                if input_exhausted {
                    break;
                }
                continue;
            }

            match tasks.join_next().await {
                Some(Ok((seq, out))) => {
                    if seq == next_to_emit {
                        next_to_emit += 1;
                        yield out;
                    } else {
                        pending.push_back((seq, out));
                    }
                }
                Some(Err(_join_err)) => continue,
                None => {
                    if input_exhausted && pending.is_empty() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn validates_min_parallelism() {
        assert!(ExecutionStrategy::Parallel(1).validate().is_err());
        assert!(ExecutionStrategy::Parallel(2).validate().is_ok());
        assert!(ExecutionStrategy::Sequential.validate().is_ok());
    }

    #[tokio::test]
    async fn sequential_preserves_order() {
        let (_guard, cancel) = crate::cancel::pair();
        let input: Pin<Box<dyn Stream<Item = i32> + Send>> =
            Box::pin(futures::stream::iter(vec![1, 2, 3, 4, 5]));
        let out: Vec<i32> = ExecutionStrategy::Sequential
            .apply(input, |x| async move { x * 2 }, cancel)
            .collect()
            .await;
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn ordered_parallel_preserves_order() {
        let (_guard, cancel) = crate::cancel::pair();
        let input: Pin<Box<dyn Stream<Item = i32> + Send>> =
            Box::pin(futures::stream::iter(1..=20));
        let out: Vec<i32> = ExecutionStrategy::OrderedParallel(4)
            .apply(
                input,
                |x| async move {
                    // Vary delay so completion order differs from arrival order.
                    tokio::time::sleep(std::time::Duration::from_micros((20 - x) as u64 * 200))
                        .await;
                    x
                },
                cancel,
            )
            .collect()
            .await;
        assert_eq!(out, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn parallel_processes_all_items() {
        let (_guard, cancel) = crate::cancel::pair();
        let input: Pin<Box<dyn Stream<Item = i32> + Send>> =
            Box::pin(futures::stream::iter(1..=50));
        let mut out: Vec<i32> = ExecutionStrategy::Parallel(8)
            .apply(input, |x| async move { x }, cancel)
            .collect()
            .await;
        out.sort_unstable();
        assert_eq!(out, (1..=50).collect::<Vec<_>>());
    }
}
