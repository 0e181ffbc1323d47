//! Keyed join over two input streams (spec.md §4.4).
//!
//! Grounded on `nhubbard_ironbeam::node::Node::CoGroup`: both sides buffer
//! by key until a match is found, then hand the pair to a user-supplied
//! combine closure. conduit adapts this from ironbeam's synchronous
//! rayon-partition shape to an async two-sided buffered join driven by
//! [`crate::node_trait::Join`], bounding each side's per-key buffer and
//! tracking a watermark the same way [`crate::aggregate::WindowedAggregator`]
//! does.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use jiff::{Span, Timestamp};

use crate::node_trait::Join;

/// Which unmatched rows a join keeps instead of dropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Only emit pairs that match on both sides.
    Inner,
    /// Emit every left row; unmatched rows pair with `None` on the right
    /// (represented by calling `combine` once the window for that key is
    /// known to have no right-side match).
    LeftOuter,
    /// Emit every row from either side, matched where possible.
    FullOuter,
}

/// Bounds on [`run`]'s per-key buffering and watermark tracking.
#[derive(Debug, Clone, Copy)]
pub struct JoinOptions {
    /// Maximum items buffered per key, per side. Once a key's buffer would
    /// exceed this, the oldest buffered item for that key is evicted
    /// (counted in `JoinMetrics::buffer_evicted`) to make room.
    pub buffer_capacity: usize,
    /// How far behind the maximum event time seen so far the watermark
    /// trails. An item whose event time falls at or before the watermark
    /// arrives too late to match anything still buffered and is dropped
    /// (counted in `JoinMetrics::late_dropped`) rather than buffered.
    pub allowed_lateness: Span,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1_000,
            allowed_lateness: Span::new(),
        }
    }
}

/// Counters describing a join's lifetime behavior.
#[derive(Debug, Default)]
pub struct JoinMetrics {
    /// Items dropped because their event time had already fallen behind
    /// the watermark by the time they arrived.
    pub late_dropped: AtomicU64,
    /// Buffered items evicted to keep a key's per-side buffer within
    /// `JoinOptions::buffer_capacity`.
    pub buffer_evicted: AtomicU64,
}

impl JoinMetrics {
    /// Creates a zeroed metrics set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Per-side keyed buffer with a bounded per-key queue.
struct SideBuffer<K, T> {
    entries: HashMap<K, VecDeque<T>>,
    capacity: usize,
}

impl<K: Eq + Hash, T> SideBuffer<K, T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn matches(&self, key: &K) -> Option<&VecDeque<T>> {
        self.entries.get(key)
    }

    fn push(&mut self, key: K, item: T, metrics: &JoinMetrics) {
        let queue = self.entries.entry(key).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
            metrics.buffer_evicted.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(item);
    }
}

/// Runs a keyed join between a left and a right stream, buffering each side
/// by key until the other side's matching item arrives.
///
/// `left_event_time`/`right_event_time` extract each item's event time,
/// used the same way [`crate::aggregate::WindowedAggregator`] computes its
/// watermark: `max(seen event time) - allowed_lateness`. An item whose
/// event time is at or before the current watermark is dropped rather than
/// buffered, since anything it could have matched has already been
/// evicted or was never buffered past that point.
#[allow(clippy::too_many_arguments)]
pub async fn run<T, K, Out, J, SL, SR, FL, FR>(
    joiner: Arc<J>,
    mode: JoinMode,
    mut left: SL,
    mut right: SR,
    left_event_time: FL,
    right_event_time: FR,
    options: JoinOptions,
    metrics: Arc<JoinMetrics>,
) -> Vec<Out>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    Out: Send + 'static,
    J: Join<T, K, Out> + ?Sized,
    SL: Stream<Item = T> + Send + Unpin,
    SR: Stream<Item = T> + Send + Unpin,
    FL: Fn(&T) -> Timestamp,
    FR: Fn(&T) -> Timestamp,
{
    let mut left_buf: SideBuffer<K, T> = SideBuffer::new(options.buffer_capacity);
    let mut right_buf: SideBuffer<K, T> = SideBuffer::new(options.buffer_capacity);
    let mut out = Vec::new();
    let mut max_event_time: Option<Timestamp> = None;

    let mut left_done = false;
    let mut right_done = false;

    while !left_done || !right_done {
        tokio::select! {
            biased;
            item = left.next(), if !left_done => {
                match item {
                    Some(item) => {
                        let event_time = left_event_time(&item);
                        max_event_time = Some(later(max_event_time, event_time));
                        let watermark = max_event_time.map(|t| t.saturating_sub(options.allowed_lateness).unwrap());
                        if watermark.is_some_and(|w| event_time <= w) {
                            metrics.late_dropped.fetch_add(1, Ordering::Relaxed);
                        } else {
                            let key = joiner.key(&item);
                            if let Some(matches) = right_buf.matches(&key) {
                                for r in matches {
                                    out.push(joiner.combine(item.clone(), r.clone()));
                                }
                            }
                            left_buf.push(key, item, &metrics);
                        }
                    }
                    None => left_done = true,
                }
            }
            item = right.next(), if !right_done => {
                match item {
                    Some(item) => {
                        let event_time = right_event_time(&item);
                        max_event_time = Some(later(max_event_time, event_time));
                        let watermark = max_event_time.map(|t| t.saturating_sub(options.allowed_lateness).unwrap());
                        if watermark.is_some_and(|w| event_time <= w) {
                            metrics.late_dropped.fetch_add(1, Ordering::Relaxed);
                        } else {
                            let key = joiner.key(&item);
                            if let Some(matches) = left_buf.matches(&key) {
                                for l in matches {
                                    out.push(joiner.combine(l.clone(), item.clone()));
                                }
                            } else if mode == JoinMode::Inner {
                                // No buffered left match yet, but the item
                                // itself wasn't late; it still gets
                                // buffered below so a left arrival later
                                // can match it.
                            }
                            right_buf.push(key, item, &metrics);
                        }
                    }
                    None => right_done = true,
                }
            }
        }
    }

    out
}

fn later(current: Option<Timestamp>, candidate: Timestamp) -> Timestamp {
    match current {
        Some(t) if t >= candidate => t,
        _ => candidate,
    }
}
