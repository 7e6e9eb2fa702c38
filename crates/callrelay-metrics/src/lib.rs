//! Metric primitives for relay call statistics.
//!
//! Provides [`Counter`], an atomic monotonic counter, and
//! [`LatencySummary`], a fixed-bucket latency distribution. Both are
//! shared behind `Arc` by many concurrent calls and serialize to plain
//! numbers so a metrics backend can scrape them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Relaxed ordering: readers only ever want an approximate point-in-time total.
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.get())
    }
}

impl serde::Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

// ── Latency ───────────────────────────────────────────────────────────

/// Upper bounds (inclusive, in microseconds) of the latency buckets.
///
/// Anything slower than the last bound lands in the overflow bucket.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

/// Latency distribution of finalized calls.
///
/// Lock-free: every field is an independent atomic, so a snapshot taken
/// while calls are ending may be off by the in-flight observations.
pub struct LatencySummary {
    count: Counter,
    total_us: Counter,
    max_us: AtomicU64,
    buckets: [Counter; LATENCY_BUCKETS_US.len() + 1],
}

impl LatencySummary {
    pub fn new() -> Self {
        Self {
            count: Counter::new(),
            total_us: Counter::new(),
            max_us: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| Counter::new()),
        }
    }

    /// Record one observation.
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.inc();
        self.total_us.add(us);
        self.max_us.fetch_max(us, Ordering::Relaxed);
        let idx = LATENCY_BUCKETS_US
            .iter()
            .position(|bound| us <= *bound)
            .unwrap_or(LATENCY_BUCKETS_US.len());
        self.buckets[idx].inc();
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_us.load(Ordering::Relaxed))
    }

    /// Mean latency, or `None` before the first observation.
    pub fn mean(&self) -> Option<Duration> {
        let count = self.count.get();
        if count == 0 {
            return None;
        }
        Some(Duration::from_micros(self.total_us.get() / count))
    }

    /// Per-bucket counts, overflow bucket last.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets.iter().map(Counter::get).collect()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.get(),
            total_us: self.total_us.get(),
            max_us: self.max_us.load(Ordering::Relaxed),
            buckets: self.bucket_counts(),
        }
    }
}

impl Default for LatencySummary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencySummary")
            .field("count", &self.count.get())
            .field("mean", &self.mean())
            .field("max", &self.max())
            .finish()
    }
}

/// Plain-data copy of a [`LatencySummary`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub total_us: u64,
    pub max_us: u64,
    pub buckets: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic_operations() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        c.add(10);
        assert_eq!(c.get(), 11);
    }

    #[test]
    fn counter_serializes_as_number() {
        let c = Counter::default();
        c.add(99);
        assert_eq!(serde_json::to_string(&c).unwrap(), "99");
    }

    #[test]
    fn empty_summary_has_no_mean() {
        let s = LatencySummary::new();
        assert_eq!(s.count(), 0);
        assert!(s.mean().is_none());
        assert_eq!(s.max(), Duration::ZERO);
    }

    #[test]
    fn summary_tracks_mean_and_max() {
        let s = LatencySummary::new();
        s.record(Duration::from_micros(100));
        s.record(Duration::from_micros(300));
        assert_eq!(s.count(), 2);
        assert_eq!(s.mean(), Some(Duration::from_micros(200)));
        assert_eq!(s.max(), Duration::from_micros(300));
    }

    #[test]
    fn observations_land_in_matching_bucket() {
        let s = LatencySummary::new();
        s.record(Duration::from_micros(100)); // bound is inclusive
        s.record(Duration::from_micros(101));
        s.record(Duration::from_secs(60)); // overflow

        let buckets = s.bucket_counts();
        assert_eq!(buckets.len(), LATENCY_BUCKETS_US.len() + 1);
        assert_eq!(buckets[0], 1);
        assert_eq!(buckets[1], 1);
        assert_eq!(buckets[LATENCY_BUCKETS_US.len()], 1);
        assert_eq!(buckets.iter().sum::<u64>(), 3);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let s = LatencySummary::new();
        s.record(Duration::from_millis(2));
        let snap = s.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: LatencySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.total_us, 2_000);
    }
}
