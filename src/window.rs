//! Time-based window assignment (spec.md §4.4).
//!
//! Grounded on `nhubbard_ironbeam::window::Window`'s closed-open interval
//! and tumbling-window arithmetic, adapted from raw `u64` millisecond math
//! to `jiff::Timestamp`/`jiff::Span` so window boundaries are expressed in
//! the same time type the rest of conduit uses for event timestamps.

use jiff::{Span, Timestamp};

/// A closed-open time interval `[start, end)` a window assigner produces
/// for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Inclusive start of the window.
    pub start: Timestamp,
    /// Exclusive end of the window.
    pub end: Timestamp,
}

impl Window {
    /// `true` if `ts` falls within `[start, end)`.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// A value carrying an event-time timestamp, required for window
/// assignment and watermark computation.
pub trait Timestamped {
    /// The event-time timestamp used to assign this value to a window.
    fn event_time(&self) -> Timestamp;
}

/// Assigns an event to the window(s) it belongs to.
pub trait WindowAssigner: Send + Sync {
    /// Returns every window `ts` is assigned to (more than one for
    /// overlapping/sliding windows).
    fn assign(&self, ts: Timestamp) -> Vec<Window>;
}

/// Fixed-size, non-overlapping windows: each event belongs to exactly one.
#[derive(Debug, Clone, Copy)]
pub struct Tumbling {
    size: Span,
}

impl Tumbling {
    /// Creates a tumbling window assigner with the given window size.
    pub fn new(size: Span) -> Self {
        Self { size }
    }

    fn window_start(&self, ts: Timestamp) -> Timestamp {
        let size_nanos = self.size.total(jiff::Unit::Nanosecond).unwrap_or(0.0) as i64;
        if size_nanos <= 0 {
            return ts;
        }
        let ts_nanos = ts.as_nanosecond();
        let window_index = ts_nanos.div_euclid(size_nanos as i128);
        Timestamp::from_nanosecond(window_index * size_nanos as i128)
            .unwrap_or(ts)
    }
}

impl WindowAssigner for Tumbling {
    fn assign(&self, ts: Timestamp) -> Vec<Window> {
        let start = self.window_start(ts);
        let end = start.saturating_add(self.size).unwrap();
        vec![Window { start, end }]
    }
}

/// Fixed-size, overlapping windows that advance by `slide` on each step; an
/// event belongs to every window whose interval contains it.
#[derive(Debug, Clone, Copy)]
pub struct Sliding {
    size: Span,
    slide: Span,
}

impl Sliding {
    /// Creates a sliding window assigner. `slide` must be `<= size` for
    /// windows to overlap as intended; a `slide >= size` degenerates to
    /// tumbling-with-gaps, which is accepted but not the intended use.
    pub fn new(size: Span, slide: Span) -> Self {
        Self { size, slide }
    }
}

impl WindowAssigner for Sliding {
    fn assign(&self, ts: Timestamp) -> Vec<Window> {
        let slide_nanos = self.slide.total(jiff::Unit::Nanosecond).unwrap_or(0.0) as i128;
        let size_nanos = self.size.total(jiff::Unit::Nanosecond).unwrap_or(0.0) as i128;
        if slide_nanos <= 0 || size_nanos <= 0 {
            return Vec::new();
        }
        let ts_nanos = ts.as_nanosecond();
        let mut idx = ts_nanos.div_euclid(slide_nanos);

        let mut windows = Vec::new();
        loop {
            let start_nanos = idx * slide_nanos;
            let end_nanos = start_nanos + size_nanos;
            if end_nanos <= ts_nanos {
                break;
            }
            let start = Timestamp::from_nanosecond(start_nanos).unwrap_or(ts);
            let end = Timestamp::from_nanosecond(end_nanos).unwrap_or(ts);
            windows.push(Window { start, end });
            idx -= 1;
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: i64) -> Timestamp {
        Timestamp::from_second(seconds).unwrap()
    }

    #[test]
    fn tumbling_assigns_exactly_one_window() {
        let assigner = Tumbling::new(Span::new().seconds(10));
        let windows = assigner.assign(ts(15));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, ts(10));
        assert_eq!(windows[0].end, ts(20));
        assert!(windows[0].contains(ts(15)));
    }

    #[test]
    fn tumbling_boundary_is_half_open() {
        let assigner = Tumbling::new(Span::new().seconds(10));
        let windows = assigner.assign(ts(20));
        assert_eq!(windows[0].start, ts(20));
        assert!(!windows[0].contains(ts(30)));
    }

    #[test]
    fn sliding_assigns_overlapping_windows() {
        let assigner = Sliding::new(Span::new().seconds(10), Span::new().seconds(5));
        let windows = assigner.assign(ts(12));
        assert!(windows.iter().all(|w| w.contains(ts(12))));
        assert!(windows.len() >= 1);
    }
}
