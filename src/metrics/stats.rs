use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated on every buffer operation.
///
/// All increments are relaxed: the counters are monotonic tallies, not part
/// of the publish/drain handshake, and must never add synchronization cost
/// to the hot path.
pub struct StatsCounter {
    offers: AtomicU64,
    coalesces: AtomicU64,
    rejections: AtomicU64,
    drains: AtomicU64,
    drained: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        StatsCounter {
            offers: AtomicU64::new(0),
            coalesces: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            drains: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    /// A value was appended as a fresh entry.
    #[inline]
    pub fn record_offer(&self) {
        self.offers.fetch_add(1, Ordering::Relaxed);
    }

    /// A value replaced a pending entry in place.
    #[inline]
    pub fn record_coalesce(&self) {
        self.coalesces.fetch_add(1, Ordering::Relaxed);
    }

    /// A value was dropped because the buffer was full.
    #[inline]
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// A drain moved `count` values to the consumer.
    #[inline]
    pub fn record_drain(&self, count: u64) {
        self.drains.fetch_add(1, Ordering::Relaxed);
        self.drained.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub fn snapshot(&self) -> Metrics {
        let offers = self.offers.load(Ordering::Relaxed);
        let coalesces = self.coalesces.load(Ordering::Relaxed);
        let rejections = self.rejections.load(Ordering::Relaxed);
        let drains = self.drains.load(Ordering::Relaxed);
        let drained = self.drained.load(Ordering::Relaxed);
        let accepted = offers + coalesces;
        let compression_ratio = if drained == 0 {
            0.0_f64
        } else {
            accepted as f64 / drained as f64
        };
        Metrics {
            offers,
            coalesces,
            rejections,
            drains,
            drained,
            compression_ratio,
        }
    }
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of buffer statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Number of values accepted as fresh entries.
    pub offers: u64,
    /// Number of values that replaced a pending entry in place.
    pub coalesces: u64,
    /// Number of values dropped because the buffer was full.
    pub rejections: u64,
    /// Number of drain calls.
    pub drains: u64,
    /// Total number of values handed to the consumer across all drains.
    pub drained: u64,
    /// `(offers + coalesces) / drained`, or `0.0` before the first delivery.
    ///
    /// How many publishes each delivered value stands for; 1.0 means the
    /// consumer kept up and nothing was coalesced away.
    pub compression_ratio: f64,
}

impl Metrics {
    /// Total values the producer ever published, accepted or not.
    pub fn publish_count(&self) -> u64 {
        self.offers + self.coalesces + self.rejections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_operations() {
        let counter = StatsCounter::new();
        counter.record_offer();
        counter.record_offer();
        counter.record_coalesce();
        counter.record_rejection();
        counter.record_drain(2);

        let m = counter.snapshot();
        assert_eq!(m.offers, 2);
        assert_eq!(m.coalesces, 1);
        assert_eq!(m.rejections, 1);
        assert_eq!(m.drains, 1);
        assert_eq!(m.drained, 2);
        assert_eq!(m.publish_count(), 4);
        assert!((m.compression_ratio - 1.5).abs() < 1e-9);
    }

    #[test]
    fn compression_ratio_is_zero_before_first_delivery() {
        let counter = StatsCounter::new();
        counter.record_offer();
        assert_eq!(counter.snapshot().compression_ratio, 0.0);
    }
}
