//! Named statistics snapshots.
//!
//! Every node and runner reports its counters as a [`NamedStats`] map. The
//! pipeline merges them under `"<node>.<stat>"` keys so a single snapshot can
//! be serialized to JSON at the end of a run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stat name to value. Ordered so serialized snapshots are stable.
pub type NamedStats = BTreeMap<String, f64>;

/// Copy every entry of `src` into `dst` as `"<prefix>.<name>"`.
pub fn merge_prefixed(dst: &mut NamedStats, prefix: &str, src: NamedStats) {
    for (name, value) in src {
        dst.insert(format!("{prefix}.{name}"), value);
    }
}

/// Monotonic event counter safe to bump from any worker thread.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Accumulated wall time, kept in microseconds and reported in milliseconds.
#[derive(Debug, Default)]
pub struct DurationCounter(AtomicU64);

impl DurationCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn add(&self, elapsed: Duration) {
        self.0
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Simple stopwatch.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
