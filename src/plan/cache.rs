//! Bounded compiled-plan cache (spec.md §4.1, §5).
//!
//! Keyed by [`GraphHash`] so that rebuilding an identical graph (same
//! structure, different builder-call order) reuses its compiled plan.
//! Concurrency shape mirrors [`crate::retry::circuit_breaker`]: a
//! `RwLock`-guarded map, lock-free on the common read path, a single write
//! lock taken only to insert a new entry or evict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::graph::{Graph, GraphHash};

use super::compiler::{self, CompiledGraph};

const DEFAULT_CAPACITY: usize = 100;

struct Entry {
    plan: Arc<CompiledGraph>,
    last_access: AtomicU64,
}

/// Caches compiled graphs by structural hash, evicting the least-recently
/// accessed entry (approximated via a monotonic access counter) once
/// `capacity` is exceeded.
pub struct PlanCache {
    entries: RwLock<HashMap<GraphHash, Entry>>,
    capacity: usize,
    clock: AtomicU64,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PlanCache {
    /// Creates an empty cache holding at most `capacity` compiled graphs.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached compiled graph for `hash`, if present, compiling
    /// and inserting `graph` via `compile` otherwise.
    pub fn get_or_compile(&self, hash: GraphHash, graph: &Graph) -> Arc<CompiledGraph> {
        if let Some(entry) = self.entries.read().unwrap().get(&hash) {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&entry.plan);
        }

        let plan = Arc::new(compiler::compile(graph));
        let mut guard = self.entries.write().unwrap();
        // Another writer may have raced us; prefer the existing entry.
        if let Some(entry) = guard.get(&hash) {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&entry.plan);
        }

        if guard.len() >= self.capacity {
            evict_oldest(&mut guard);
        }
        guard.insert(
            hash,
            Entry {
                plan: Arc::clone(&plan),
                last_access: AtomicU64::new(self.tick()),
            },
        );
        plan
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every cached entry.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

fn evict_oldest(entries: &mut HashMap<GraphHash, Entry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
        .map(|(hash, _)| *hash);
    if let Some(hash) = oldest {
        entries.remove(&hash);
    }
}
