//! The coalescing buffer contract shared by every variant.
//!
//! A coalescing buffer sits between one fast producer side and one slow
//! consumer side. Publishing a value under a key that already has a pending
//! entry replaces that entry's value in place, keeping its original arrival
//! position; draining hands every pending value to the consumer in arrival
//! order and empties the buffer. A slow consumer therefore observes a
//! bounded, de-duplicated, order-preserving view of the update stream
//! instead of every intermediate value.

use crate::metrics::stats::Metrics;

/// Bounded queue that keeps only the latest value per key.
///
/// Which threads may call which side differs per implementation:
/// [`RingBuffer`] is strictly one producer / one consumer, while
/// [`LockedBuffer`] and [`CowBuffer`] accept any number of each. The
/// operations themselves behave identically everywhere.
///
/// [`RingBuffer`]: crate::RingBuffer
/// [`LockedBuffer`]: crate::LockedBuffer
/// [`CowBuffer`]: crate::CowBuffer
pub trait CoalescingBuffer<K, V> {
    /// Publishes `value` under `key`.
    ///
    /// If the buffer holds a pending entry for an equal key, its value is
    /// replaced in place and its arrival position is unchanged. Otherwise
    /// the value is appended as a fresh entry, unless the buffer is full,
    /// in which case the value is dropped and `false` is returned.
    ///
    /// A replacement succeeds even when the buffer is full, since it does
    /// not grow the buffer.
    fn offer(&self, key: K, value: V) -> bool;

    /// Publishes `value` as a fresh entry that never coalesces, not with
    /// keyed entries and not with other non-collapsible entries.
    ///
    /// Fails only when the buffer is full.
    fn offer_non_collapsible(&self, value: V) -> bool;

    /// Moves every pending value into `out` in arrival order and returns
    /// the number moved.
    ///
    /// Values published while the drain is in flight are picked up by this
    /// drain or the next one, per the implementation's race rules.
    fn drain(&self, out: &mut Vec<V>) -> usize;

    /// Number of pending (published, not yet drained) entries.
    fn len(&self) -> usize;

    /// Maximum number of pending entries.
    ///
    /// [`RingBuffer`] rounds the requested capacity up to a power of two
    /// and reports the rounded value here.
    ///
    /// [`RingBuffer`]: crate::RingBuffer
    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Returns a point-in-time snapshot of the operation counters.
    fn stats(&self) -> Metrics;
}
