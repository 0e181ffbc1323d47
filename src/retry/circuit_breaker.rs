//! Per-node circuit breaker (spec.md §4.5, §7).
//!
//! Tracks consecutive failures per node and trips to `Open` once a
//! threshold is exceeded, shedding load until a cooldown elapses. Uses the
//! same `RwLock`-guarded-map idiom as [`crate::plan::cache`]: lock-free on
//! the common read path, a single write lock taken only to insert a new
//! entry or evict stale ones.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::graph::node::NodeId;

/// Observable state of a single node's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Requests are rejected immediately until `retry_after` elapses.
    Open,
    /// A single probe request is allowed through to test recovery.
    HalfOpen,
}

/// Tunables for one node's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip from `Closed` to `Open`.
    pub failure_threshold: u32,
    /// How long the circuit stays `Open` before allowing a probe.
    pub open_duration: Duration,
    /// Upper bound on the number of tracked nodes. Once reached, the
    /// least-recently-touched entry is evicted before a new one is
    /// inserted, bounding the table's memory regardless of how many
    /// distinct node ids pass through it over a run's lifetime.
    pub max_entries: usize,
    /// Entries untouched for this long are evicted on the next cleanup pass.
    pub inactivity_ttl: Duration,
    /// How often [`CircuitBreakerTable::cleanup`] should be invoked by a
    /// housekeeping task.
    pub cleanup_interval: Duration,
    /// Upper bound on how long a single [`CircuitBreakerTable::cleanup`]
    /// call may run; it stops sweeping and leaves the remainder for the
    /// next pass rather than holding the write lock indefinitely, so a
    /// cleanup pass never blocks a failing invocation's `check`/`record`
    /// call for longer than this.
    pub cleanup_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            max_entries: 10_000,
            inactivity_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            cleanup_timeout: Duration::from_millis(50),
        }
    }
}

/// A single node's circuit breaker bookkeeping.
#[derive(Debug, Clone)]
pub struct CircuitBreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_touched: Instant,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerEntry {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_touched: Instant::now(),
            config,
        }
    }

    /// Current state, resolving `Open -> HalfOpen` if the cooldown elapsed.
    pub fn state(&mut self) -> CircuitState {
        if self.state == CircuitState::Open
            && let Some(opened_at) = self.opened_at
            && opened_at.elapsed() >= self.config.open_duration
        {
            self.state = CircuitState::HalfOpen;
        }
        self.state
    }

    /// How much longer an `Open` circuit will reject requests.
    pub fn retry_after(&self) -> Duration {
        match self.opened_at {
            Some(opened_at) => self
                .config
                .open_duration
                .saturating_sub(opened_at.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.last_touched = Instant::now();
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_touched = Instant::now();
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.config.failure_threshold
        {
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

fn evict_oldest(entries: &mut HashMap<NodeId, Arc<std::sync::Mutex<CircuitBreakerEntry>>>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.lock().unwrap().last_touched)
        .map(|(id, _)| *id);
    if let Some(id) = oldest {
        entries.remove(&id);
    }
}

/// Concurrent table of per-node circuit breakers.
pub struct CircuitBreakerTable {
    entries: RwLock<HashMap<NodeId, Arc<std::sync::Mutex<CircuitBreakerEntry>>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerTable {
    /// Creates an empty table using `default_config` for any node that has
    /// not been given a node-specific configuration.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    fn entry_for(&self, node_id: NodeId) -> Arc<std::sync::Mutex<CircuitBreakerEntry>> {
        if let Some(entry) = self.entries.read().unwrap().get(&node_id) {
            return Arc::clone(entry);
        }
        let mut guard = self.entries.write().unwrap();
        if let Some(entry) = guard.get(&node_id) {
            return Arc::clone(entry);
        }
        if guard.len() >= self.default_config.max_entries {
            evict_oldest(&mut guard);
        }
        Arc::clone(
            guard
                .entry(node_id)
                .or_insert_with(|| Arc::new(std::sync::Mutex::new(CircuitBreakerEntry::new(self.default_config)))),
        )
    }

    /// Returns `Ok(())` if a request may proceed, or `Err(retry_after)` if
    /// the circuit is open.
    pub fn check(&self, node_id: NodeId) -> Result<(), Duration> {
        let entry = self.entry_for(node_id);
        let mut guard = entry.lock().unwrap();
        match guard.state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(guard.retry_after()),
        }
    }

    /// Records the outcome of a request that [`Self::check`] admitted.
    pub fn record(&self, node_id: NodeId, success: bool) {
        let entry = self.entry_for(node_id);
        let mut guard = entry.lock().unwrap();
        if success {
            guard.record_success();
        } else {
            guard.record_failure();
        }
    }

    /// Removes entries untouched for longer than their configured
    /// `inactivity_ttl`. Intended to be invoked periodically by a
    /// housekeeping task rather than inline on the request path. Bounded by
    /// `cleanup_timeout`: a pass that takes too long stops sweeping and
    /// leaves the remaining entries for the next pass rather than holding
    /// the write lock indefinitely.
    pub fn cleanup(&self) {
        let deadline = Instant::now() + self.default_config.cleanup_timeout;
        let mut guard = self.entries.write().unwrap();
        let stale: Vec<NodeId> = guard
            .iter()
            .take_while(|_| Instant::now() < deadline)
            .filter(|(_, entry)| {
                let e = entry.lock().unwrap();
                e.last_touched.elapsed() >= e.config.inactivity_ttl
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            guard.remove(&id);
        }
    }

    /// Number of nodes currently tracked.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
