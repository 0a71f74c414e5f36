//! Wait-free single-producer / single-consumer coalescing ring.
//!
//! The reference implementation: a fixed power-of-two slot array addressed
//! by monotonically increasing sequence numbers, with **no locks and no
//! blocking** — every publish is one scan plus at most one pointer swap, and
//! every drain is one pass over the claimed region.
//!
//! ## Design
//!
//! Three monotone counters describe the buffer. `next_write` is the sequence
//! the producer will fill next. `last_read` is the newest sequence the
//! consumer has fully consumed. `first_write` is the handshake: at the start
//! of every drain the consumer sets it to `next_write`, claiming everything
//! below for reading. The producer's coalescing scan covers exactly the
//! unclaimed region `first_write .. next_write`, so an in-place
//! update can race a drain only in the window between the scan and the
//! claim, and the producer detects that window by re-reading `first_write`
//! after the swap.
//!
//! Keys live in plain cells touched only by the producer; values cross
//! threads through an atomic pointer swap per slot, which is what lets an
//! in-place update and a concurrent drain of the same slot both stay sound.
//!
//! ## Known race
//!
//! When a drain claims a slot between the producer's scan and its in-place
//! swap, the update might be missed by the in-flight read. The producer
//! resolves this by taking the value back out of the slot: if the consumer
//! got there first the value is already on its way out, otherwise the
//! producer re-appends it behind the claimed region and it arrives with the
//! next drain. Either way the value is delivered exactly once; its arrival
//! position moves to the tail only in this window. The consumer skips the
//! emptied slot.

use std::cell::{Cell, UnsafeCell};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::buffer::CoalescingBuffer;
use crate::key::EntryKey;
use crate::metrics::stats::{Metrics, StatsCounter};

struct Slot<K, V> {
    /// Written and read only by the producer.
    key: UnsafeCell<Option<EntryKey<K>>>,
    /// Owning pointer to the pending value; null = empty.
    value: AtomicPtr<V>,
}

/// Wait-free coalescing buffer for exactly one producer thread and exactly
/// one consumer thread.
///
/// The single-producer / single-consumer split is a convention the caller
/// must uphold — it is not checked at runtime, and violating it is undefined
/// behavior. All other variants in this crate tolerate any thread count.
///
/// The requested capacity is rounded up to the next power of two so slot
/// addressing is a mask instead of a division; [`capacity`] reports the
/// rounded value.
///
/// [`capacity`]: CoalescingBuffer::capacity
///
/// # Example
/// ```
/// use lungo::{CoalescingBuffer, RingBuffer};
///
/// let ring: RingBuffer<u64, &str> = RingBuffer::new(8);
/// assert!(ring.offer(1, "vod_a"));
/// assert!(ring.offer(2, "bp"));
/// assert!(ring.offer(1, "vod_b")); // replaces vod_a in place
///
/// let mut out = Vec::new();
/// assert_eq!(ring.drain(&mut out), 2);
/// assert_eq!(out, vec!["vod_b", "bp"]);
/// ```
pub struct RingBuffer<K, V> {
    slots: Box<[Slot<K, V>]>,
    /// Always `slots.len() - 1`; slots.len() is a power of two.
    mask: u64,
    capacity: usize,

    /// Sequence of the next slot the producer will write. Starts at 1.
    next_write: CachePadded<AtomicU64>,
    /// Oldest sequence the producer may still coalesce into. Advanced to
    /// `next_write` by the consumer at the start of each drain.
    first_write: CachePadded<AtomicU64>,
    /// Newest sequence the consumer has fully consumed. Starts at 0.
    last_read: CachePadded<AtomicU64>,

    /// Highest sequence whose slot the producer has cleared. Producer-only.
    last_cleaned: Cell<u64>,

    stats: StatsCounter,
}

// SAFETY: sound only under the documented one-producer / one-consumer split.
// Key cells and `last_cleaned` are producer-exclusive, `last_read` advances
// only on the consumer, and every value crosses between the two threads via
// an atomic pointer swap, so moving entries around requires no more than
// `K: Send` and `V: Send`.
unsafe impl<K: Send, V: Send> Send for RingBuffer<K, V> {}
unsafe impl<K: Send, V: Send> Sync for RingBuffer<K, V> {}

impl<K, V> RingBuffer<K, V> {
    /// Creates a ring with at least `capacity` slots, rounded up to the
    /// next power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let capacity = capacity.next_power_of_two();

        let slots = (0..capacity)
            .map(|_| Slot {
                key: UnsafeCell::new(None),
                value: AtomicPtr::new(ptr::null_mut()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        RingBuffer {
            slots,
            mask: capacity as u64 - 1,
            capacity,
            next_write: CachePadded::new(AtomicU64::new(1)),
            first_write: CachePadded::new(AtomicU64::new(1)),
            last_read: CachePadded::new(AtomicU64::new(0)),
            last_cleaned: Cell::new(0),
            stats: StatsCounter::new(),
        }
    }

    #[inline]
    fn slot(&self, sequence: u64) -> &Slot<K, V> {
        &self.slots[(sequence & self.mask) as usize]
    }

    /// Clears the slots of entries consumed since the last append, so a dead
    /// entry's key allocation is released before the slot wraps around.
    /// Producer-only.
    fn clean_up(&self) {
        // Acquire pairs with the consumer's Release store of `last_read`:
        // a slot is reused only after its read is known to be complete.
        let last_read = self.last_read.load(Ordering::Acquire);
        let mut cleaned = self.last_cleaned.get();
        if cleaned == last_read {
            return;
        }

        while cleaned < last_read {
            cleaned += 1;
            let slot = self.slot(cleaned);
            // SAFETY: key cells are producer-exclusive, and sequence
            // `cleaned` has been consumed.
            unsafe { *slot.key.get() = None };
            // Consumed slots are normally already empty; the swap releases
            // anything the consumer left behind.
            let leftover = slot.value.swap(ptr::null_mut(), Ordering::Relaxed);
            if !leftover.is_null() {
                drop(unsafe { Box::from_raw(leftover) });
            }
        }
        self.last_cleaned.set(cleaned);
    }

    /// Appends a fresh entry at `next_write`. Producer-only.
    fn append(&self, key: EntryKey<K>, value: V) -> bool {
        let next_write = self.next_write.load(Ordering::Relaxed);
        let last_read = self.last_read.load(Ordering::Acquire);
        if next_write - last_read - 1 == self.capacity as u64 {
            self.stats.record_rejection();
            return false;
        }

        self.clean_up();

        let slot = self.slot(next_write);
        // SAFETY: key cells are producer-exclusive; the previous occupant of
        // this slot was consumed, or the slot has never been used.
        unsafe { *slot.key.get() = Some(key) };
        let fresh = Box::into_raw(Box::new(value));
        let displaced = slot.value.swap(fresh, Ordering::Release);
        debug_assert!(displaced.is_null(), "slot of a consumed entry holds a value");

        // Release: a consumer observing the advanced counter also observes
        // the key and value stored above.
        self.next_write.store(next_write + 1, Ordering::Release);
        self.stats.record_offer();
        true
    }
}

impl<K: Eq, V> CoalescingBuffer<K, V> for RingBuffer<K, V> {
    fn offer(&self, key: K, value: V) -> bool {
        let next_write = self.next_write.load(Ordering::Relaxed);
        let mut position = self.first_write.load(Ordering::SeqCst);

        while position < next_write {
            let slot = self.slot(position);
            // SAFETY: key cells are producer-exclusive.
            let found = unsafe { (*slot.key.get()).as_ref().is_some_and(|k| k.matches(&key)) };
            if !found {
                position += 1;
                continue;
            }

            let fresh = Box::into_raw(Box::new(value));
            // SeqCst, as is the claim store in `drain`: this swap and the
            // re-read of `first_write` below form a store -> load edge that
            // release/acquire cannot order.
            let stale = slot.value.swap(fresh, Ordering::SeqCst);
            if !stale.is_null() {
                // The superseded value; the consumer had not taken it.
                drop(unsafe { Box::from_raw(stale) });
            }

            if position >= self.first_write.load(Ordering::SeqCst) {
                // The slot is still unclaimed, so the update is visible to
                // the next drain.
                self.stats.record_coalesce();
                return true;
            }

            // A drain claimed this slot between the scan and the swap, and
            // may or may not have seen the update. Whoever wins the slot
            // delivers the value: null means the consumer took it and it is
            // on its way out; otherwise take it back and append it behind
            // the claimed region.
            let reclaimed = slot.value.swap(ptr::null_mut(), Ordering::SeqCst);
            if reclaimed.is_null() {
                self.stats.record_coalesce();
                return true;
            }
            let value = unsafe { *Box::from_raw(reclaimed) };
            return self.append(EntryKey::Keyed(key), value);
        }

        self.append(EntryKey::Keyed(key), value)
    }

    fn offer_non_collapsible(&self, value: V) -> bool {
        // The entry's own sequence number is a serial no other entry,
        // keyed or not, can ever equal.
        let serial = self.next_write.load(Ordering::Relaxed);
        self.append(EntryKey::NonCollapsible(serial), value)
    }

    fn drain(&self, out: &mut Vec<V>) -> usize {
        let last_read = self.last_read.load(Ordering::Relaxed);
        let next_write = self.next_write.load(Ordering::Acquire);

        // Claim the whole pending region before touching any slot. SeqCst
        // orders this store ahead of the slot reads below and pairs with
        // the producer's re-read after an in-place swap.
        self.first_write.store(next_write, Ordering::SeqCst);

        let before = out.len();
        let mut sequence = last_read + 1;
        while sequence < next_write {
            let taken = self.slot(sequence).value.swap(ptr::null_mut(), Ordering::SeqCst);
            if !taken.is_null() {
                out.push(unsafe { *Box::from_raw(taken) });
            }
            // An empty slot was reclaimed by the producer mid-claim; its
            // value was re-appended behind `next_write`.
            sequence += 1;
        }

        // Release: the producer's cleanup may reuse these slots only after
        // it observes the advanced counter.
        self.last_read.store(next_write - 1, Ordering::Release);

        let moved = out.len() - before;
        self.stats.record_drain(moved as u64);
        moved
    }

    fn len(&self) -> usize {
        let next_write = self.next_write.load(Ordering::Acquire);
        let last_read = self.last_read.load(Ordering::Acquire);
        // Saturating: an observer thread can load the two counters across a
        // concurrent drain.
        next_write.saturating_sub(last_read + 1) as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn stats(&self) -> Metrics {
        self.stats.snapshot()
    }
}

impl<K, V> Drop for RingBuffer<K, V> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let pending = slot.value.swap(ptr::null_mut(), Ordering::Relaxed);
            if !pending.is_null() {
                drop(unsafe { Box::from_raw(pending) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn capacity_rounds_up_to_a_power_of_two() {
        let ring: RingBuffer<u64, u64> = RingBuffer::new(10);
        assert_eq!(ring.capacity(), 16);

        let ring: RingBuffer<u64, u64> = RingBuffer::new(8);
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_is_rejected() {
        let _ = RingBuffer::<u64, u64>::new(0);
    }

    #[test]
    fn coalesce_keeps_the_first_arrival_position() {
        let ring: RingBuffer<u64, &str> = RingBuffer::new(8);
        assert!(ring.offer(1, "vod_a"));
        assert!(ring.offer(2, "bp"));
        assert!(ring.offer(1, "vod_b"));
        assert_eq!(ring.len(), 2);

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(out, vec!["vod_b", "bp"]);
    }

    #[test]
    fn rejects_a_new_key_when_full_but_still_updates_existing_keys() {
        let ring: RingBuffer<u64, &str> = RingBuffer::new(2);
        assert!(ring.offer(1, "bp"));
        assert!(ring.offer(2, "vod1"));
        assert!(ring.is_full());

        assert!(!ring.offer(4, "vod2"), "unseen key must be dropped when full");
        assert!(ring.offer(2, "vod2"), "update must succeed even when full");
        assert_eq!(ring.len(), 2);

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(out, vec!["bp", "vod2"]);
    }

    #[test]
    fn a_drained_key_does_not_coalesce_across_the_drain_boundary() {
        let ring: RingBuffer<u64, &str> = RingBuffer::new(8);
        let mut out = Vec::new();

        assert!(ring.offer(1, "vod_a"));
        assert_eq!(ring.drain(&mut out), 1);
        assert_eq!(out, vec!["vod_a"]);

        assert!(ring.offer(1, "vod_b"));
        out.clear();
        assert_eq!(ring.drain(&mut out), 1);
        assert_eq!(out, vec!["vod_b"]);
    }

    #[test]
    fn non_collapsible_entries_never_merge() {
        let ring: RingBuffer<u64, &str> = RingBuffer::new(4);
        assert!(ring.offer_non_collapsible("a"));
        assert!(ring.offer_non_collapsible("a"));
        assert!(ring.offer(7, "keyed"));
        assert!(ring.offer_non_collapsible("b"));
        assert!(ring.is_full());
        assert!(!ring.offer_non_collapsible("dropped"));

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out), 4);
        assert_eq!(out, vec!["a", "a", "keyed", "b"]);
    }

    #[test]
    fn sequences_wrap_cleanly_around_the_slot_array() {
        let ring: RingBuffer<u64, u64> = RingBuffer::new(4);
        let mut out = Vec::new();

        for round in 0..10u64 {
            for k in 0..4u64 {
                assert!(ring.offer(k, round * 10 + k));
            }
            assert!(ring.is_full());

            out.clear();
            assert_eq!(ring.drain(&mut out), 4);
            assert_eq!(
                out,
                vec![round * 10, round * 10 + 1, round * 10 + 2, round * 10 + 3]
            );
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn drain_empties_the_ring() {
        let ring: RingBuffer<u64, u64> = RingBuffer::new(8);
        for k in 0..5u64 {
            assert!(ring.offer(k, k));
        }

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out), 5);
        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());

        out.clear();
        assert_eq!(ring.drain(&mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn stats_count_offers_coalesces_rejections_and_drains() {
        let ring: RingBuffer<u64, u64> = RingBuffer::new(2);
        assert!(ring.offer(1, 10));
        assert!(ring.offer(1, 11));
        assert!(ring.offer(2, 20));
        assert!(!ring.offer(3, 30));

        let mut out = Vec::new();
        ring.drain(&mut out);

        let m = ring.stats();
        assert_eq!(m.offers, 2);
        assert_eq!(m.coalesces, 1);
        assert_eq!(m.rejections, 1);
        assert_eq!(m.drains, 1);
        assert_eq!(m.drained, 2);
        assert!((m.compression_ratio - 1.5).abs() < 1e-9);
    }

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn every_value_is_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let tracked = || Tracked(Arc::clone(&drops));

        let ring: RingBuffer<u64, Tracked> = RingBuffer::new(4);
        assert!(ring.offer(1, tracked()));
        assert!(ring.offer(1, tracked())); // superseded value drops here
        assert!(ring.offer(2, tracked()));
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out), 2);
        drop(out);
        assert_eq!(drops.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn dropping_a_non_empty_ring_releases_pending_values() {
        let drops = Arc::new(AtomicUsize::new(0));

        let ring: RingBuffer<u64, Tracked> = RingBuffer::new(8);
        for k in 0..5u64 {
            assert!(ring.offer(k, Tracked(Arc::clone(&drops))));
        }
        drop(ring);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn spsc_pipeline_delivers_the_latest_value_per_key() {
        const KEYS: u64 = 8;
        const ROUNDS: u64 = 2_000;

        let ring: Arc<RingBuffer<u64, (u64, u64)>> = Arc::new(RingBuffer::new(4));
        let producer_ring = Arc::clone(&ring);

        let producer = std::thread::spawn(move || {
            for round in 1..=ROUNDS {
                for key in 0..KEYS {
                    // Spin until accepted so the final value per key is
                    // guaranteed to reach the consumer.
                    while !producer_ring.offer(key, (key, round)) {
                        std::hint::spin_loop();
                    }
                }
            }
        });

        let mut latest = [0u64; KEYS as usize];
        let mut out: Vec<(u64, u64)> = Vec::new();
        loop {
            let done = ring.len() == 0 && producer.is_finished();
            out.clear();
            ring.drain(&mut out);
            for &(key, round) in &out {
                assert!(
                    round >= latest[key as usize],
                    "key {} went backwards: {} after {}",
                    key,
                    round,
                    latest[key as usize]
                );
                latest[key as usize] = round;
            }
            if done && out.is_empty() {
                break;
            }
        }
        producer.join().unwrap();

        assert_eq!(latest, [ROUNDS; KEYS as usize]);
    }
}
