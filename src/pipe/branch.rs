//! Multicast (branching / fan-out) over a single-producer [`super::DataPipe`].
//!
//! Implements spec.md §4.2 and the design note in spec.md §9: "implement as
//! a source-driven broadcast with per-subscriber bounded queues. When any
//! queue is full and capacity is set, the producer suspends until all
//! subscribers drain below a low-water mark (default = capacity/2)."

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use tokio::sync::{Notify, mpsc};

use super::DataPipe;

/// Per-subscriber backpressure configuration for a branched pipe.
///
/// `capacity = None` (the default) makes every subscriber queue unbounded:
/// the producer never blocks, and the slowest consumer determines memory
/// growth, a documented trade-off per spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchOptions {
    /// Bound on each subscriber's internal buffer, or `None` for unbounded.
    pub capacity: Option<usize>,
}

impl Default for BranchOptions {
    fn default() -> Self {
        Self { capacity: None }
    }
}

impl BranchOptions {
    /// Creates bounded branch options with the given per-subscriber capacity.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }

    /// The low-water mark below which a suspended producer resumes:
    /// `capacity / 2`, per spec.md §9. Unbounded options have no low-water
    /// mark since the producer never suspends.
    pub fn low_water_mark(&self) -> Option<usize> {
        self.capacity.map(|c| c / 2)
    }
}

/// A single subscriber's queue handle returned by [`Branch::subscribe`].
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    in_flight: Arc<AtomicUsize>,
    drained_below_low_water: Arc<Notify>,
    low_water_mark: Option<usize>,
}

impl<T> Subscription<T> {
    /// Pulls the next item for this subscriber, or `None` once the
    /// producer has finished and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            let remaining = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
            if let Some(low) = self.low_water_mark
                && remaining <= low
            {
                self.drained_below_low_water.notify_waiters();
            }
        }
        item
    }
}

/// Fans a single producer stream out to multiple per-subscriber queues,
/// preserving per-subscriber FIFO order without synchronizing across
/// subscribers (spec.md §4.2, §5).
pub struct Branch<T> {
    senders: Vec<mpsc::UnboundedSender<T>>,
    counters: Vec<Arc<AtomicUsize>>,
    notifies: Vec<Arc<Notify>>,
    options: BranchOptions,
}

impl<T: Clone + Send + 'static> Branch<T> {
    /// Creates an empty branch with the given backpressure options; call
    /// [`Self::subscribe`] once per downstream consumer before calling
    /// [`Self::run`].
    pub fn new(options: BranchOptions) -> Self {
        Self {
            senders: Vec::new(),
            counters: Vec::new(),
            notifies: Vec::new(),
            options,
        }
    }

    /// Registers a new subscriber and returns its queue handle.
    pub fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        self.senders.push(tx);
        self.counters.push(Arc::clone(&counter));
        self.notifies.push(Arc::clone(&notify));
        Subscription {
            rx,
            in_flight: counter,
            drained_below_low_water: notify,
            low_water_mark: self.options.low_water_mark(),
        }
    }

    /// Drives `source` to completion, pushing each item to every
    /// subscriber. When `options.capacity` is set and any subscriber's
    /// in-flight count is at or above capacity, the producer suspends
    /// (cooperatively yields) until that subscriber drains below the
    /// low-water mark, per spec.md §9.
    pub async fn run(self, source: DataPipe<T>) {
        let Self {
            senders,
            counters,
            notifies,
            options,
        } = self;
        let mut stream = source.into_inner();

        while let Some(item) = stream.next().await {
            if let Some(capacity) = options.capacity {
                for (counter, notify) in counters.iter().zip(notifies.iter()) {
                    while counter.load(Ordering::Acquire) >= capacity {
                        notify.notified().await;
                    }
                }
            }
            for (sender, counter) in senders.iter().zip(counters.iter()) {
                if sender.send(item.clone()).is_ok() {
                    counter.fetch_add(1, Ordering::AcqRel);
                }
                // A closed receiver means that subscriber has already
                // completed or been dropped; dropping the item for it is
                // the correct behavior since nothing will ever read it.
            }
        }
        // Dropping `senders` here closes every subscriber's channel,
        // causing `Subscription::next` to return `None` once drained.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_subscribers_see_every_item_in_order() {
        let mut branch = Branch::new(BranchOptions::default());
        let mut s1 = branch.subscribe();
        let mut s2 = branch.subscribe();

        let source = DataPipe::new("src", futures::stream::iter(vec!["x", "y", "z"]));
        let handle = tokio::spawn(branch.run(source));

        let mut out1 = Vec::new();
        while let Some(v) = s1.next().await {
            out1.push(v);
        }
        let mut out2 = Vec::new();
        while let Some(v) = s2.next().await {
            out2.push(v);
        }
        handle.await.unwrap();

        assert_eq!(out1, vec!["x", "y", "z"]);
        assert_eq!(out2, vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn bounded_capacity_limits_in_flight_items() {
        let mut branch = Branch::new(BranchOptions::bounded(2));
        let mut slow = branch.subscribe();

        let source = DataPipe::new("src", futures::stream::iter(0..10));
        let handle = tokio::spawn(branch.run(source));

        // Drain one at a time with a delay, verifying the producer doesn't
        // race arbitrarily far ahead (best-effort: we just check it
        // eventually completes and preserves order).
        let mut out = Vec::new();
        while let Some(v) = slow.next().await {
            out.push(v);
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        handle.await.unwrap();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }
}
