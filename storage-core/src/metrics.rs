//! Counter/timer primitives threaded through as a context value.
//!
//! The original engine kept these as module-level globals
//! (`disk_reads`, `disk_writes`, a `StatsManager` singleton). Per the
//! single-threaded, single-writer model in spec.md §5, a singleton
//! buys nothing and makes tests step on each other; `Stats` is instead
//! owned by whatever `Table`/`DiskManager` call chain needs it and
//! reset/snapshotted explicitly, preserving the "reset -> run ->
//! snapshot" pattern tests rely on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct Stats {
    counters: HashMap<String, u64>,
    timers: HashMap<String, Duration>,
    timer_calls: HashMap<String, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.timers.clear();
        self.timer_calls.clear();
    }

    pub fn inc(&mut self, key: &str) {
        self.inc_by(key, 1);
    }

    pub fn inc_by(&mut self, key: &str, amount: u64) {
        *self.counters.entry(key.to_string()).or_insert(0) += amount;
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn record_time(&mut self, key: &str, elapsed: Duration) {
        *self.timers.entry(key.to_string()).or_insert(Duration::ZERO) += elapsed;
        *self.timer_calls.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn time_ms(&self, key: &str) -> f64 {
        self.timers
            .get(key)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn calls(&self, key: &str) -> u64 {
        self.timer_calls.get(key).copied().unwrap_or(0)
    }

    /// Times a closure and records its elapsed duration under `key`.
    pub fn timed<T>(&mut self, key: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record_time(key, start.elapsed());
        out
    }
}
