//! Windowed, keyed aggregation (spec.md §4.4).
//!
//! Grounded on `nhubbard_ironbeam::combiners`' accumulator shape (create /
//! accumulate / finish), driven here by a [`WindowAssigner`] and a
//! watermark instead of ironbeam's static partition boundaries.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jiff::{Span, Timestamp};

use crate::node_trait::Aggregate;
use crate::window::{Window, WindowAssigner};

/// Counters describing an aggregation run's lifetime behavior.
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    /// Items whose event time fell before the current watermark and were
    /// dropped instead of accumulated.
    pub late_dropped: AtomicU64,
}

impl AggregateMetrics {
    /// Creates a zeroed metrics set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Tracks in-flight accumulators for one aggregate node and emits closed
/// windows as the watermark advances.
///
/// The watermark is `max(seen event time) - allowed_lateness` (spec.md
/// §4.4): any window whose end is at or before the watermark is considered
/// closed and is flushed on the next [`Self::advance_watermark`] call.
pub struct WindowedAggregator<T, K, A, Agg>
where
    K: Eq + Hash + Clone,
{
    aggregate: Arc<Agg>,
    assigner: Arc<dyn WindowAssigner>,
    allowed_lateness: Span,
    max_event_time: Option<Timestamp>,
    accumulators: HashMap<(K, Window), A>,
    metrics: Arc<AggregateMetrics>,
    _marker: std::marker::PhantomData<T>,
}

impl<T, K, A, Agg> WindowedAggregator<T, K, A, Agg>
where
    T: Clone,
    K: Eq + Hash + Clone,
    Agg: Aggregate<T, K, A>,
{
    /// Creates an aggregator with no accumulated state and no watermark yet.
    pub fn new(aggregate: Arc<Agg>, assigner: Arc<dyn WindowAssigner>, allowed_lateness: Span) -> Self {
        Self {
            aggregate,
            assigner,
            allowed_lateness,
            max_event_time: None,
            accumulators: HashMap::new(),
            metrics: AggregateMetrics::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// This aggregator's metrics handle.
    pub fn metrics(&self) -> Arc<AggregateMetrics> {
        Arc::clone(&self.metrics)
    }

    fn watermark(&self) -> Option<Timestamp> {
        self.max_event_time
            .map(|t| t.saturating_sub(self.allowed_lateness).unwrap())
    }

    /// Folds one item, assigned to event time `event_time`, into every
    /// window it belongs to. Drops the item (counted in
    /// `metrics.late_dropped`) if its window already closed relative to the
    /// current watermark.
    pub fn accumulate(&mut self, item: T, event_time: Timestamp) {
        self.max_event_time = Some(match self.max_event_time {
            Some(current) if current >= event_time => current,
            _ => event_time,
        });
        let watermark = self.watermark();

        for window in self.assigner.assign(event_time) {
            if let Some(watermark) = watermark
                && window.end <= watermark
            {
                self.metrics.late_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let key = self.aggregate.get_key(&item);
            let acc = self
                .accumulators
                .entry((key, window))
                .or_insert_with(|| self.aggregate.create_accumulator());
            self.aggregate.accumulate(acc, item.clone());
        }
    }

    /// Removes and emits every window whose end is at or before the
    /// current watermark.
    pub fn drain_closed_windows(&mut self) -> Vec<Agg::Out> {
        let Some(watermark) = self.watermark() else {
            return Vec::new();
        };
        let closed: Vec<(K, Window)> = self
            .accumulators
            .keys()
            .filter(|(_, window)| window.end <= watermark)
            .cloned()
            .collect();

        closed
            .into_iter()
            .filter_map(|key_window| {
                self.accumulators
                    .remove(&key_window)
                    .map(|acc| self.aggregate.emit(key_window.0, acc))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Tumbling;

    struct CountByParity;
    impl Aggregate<i32, bool, u32> for CountByParity {
        type Out = (bool, u32);
        fn get_key(&self, item: &i32) -> bool {
            item % 2 == 0
        }
        fn create_accumulator(&self) -> u32 {
            0
        }
        fn accumulate(&self, acc: &mut u32, _item: i32) {
            *acc += 1;
        }
        fn emit(&self, key: bool, acc: u32) -> (bool, u32) {
            (key, acc)
        }
    }

    fn ts(seconds: i64) -> Timestamp {
        Timestamp::from_second(seconds).unwrap()
    }

    #[test]
    fn counts_accumulate_and_emit_on_watermark_advance() {
        let assigner: Arc<dyn WindowAssigner> = Arc::new(Tumbling::new(Span::new().seconds(10)));
        let mut agg = WindowedAggregator::new(Arc::new(CountByParity), assigner, Span::new().seconds(0));

        agg.accumulate(2, ts(1));
        agg.accumulate(4, ts(2));
        agg.accumulate(1, ts(3));
        assert!(agg.drain_closed_windows().is_empty());

        agg.accumulate(0, ts(11));
        let emitted = agg.drain_closed_windows();
        assert_eq!(emitted.len(), 2);
        assert!(emitted.contains(&(true, 2)));
        assert!(emitted.contains(&(false, 1)));
    }

    #[test]
    fn late_items_are_dropped_and_counted() {
        let assigner: Arc<dyn WindowAssigner> = Arc::new(Tumbling::new(Span::new().seconds(10)));
        let mut agg = WindowedAggregator::new(Arc::new(CountByParity), assigner, Span::new().seconds(0));

        agg.accumulate(0, ts(100));
        agg.accumulate(0, ts(1));
        assert_eq!(agg.metrics().late_dropped.load(Ordering::Relaxed), 1);
    }
}
