//! Copy-on-write coalescing buffer.
//!
//! State is one atomically-held snapshot: an immutable insertion-ordered
//! map. A publish clones the current map, applies the change, and installs
//! the copy with a compare-and-swap, retrying from a fresh load when another
//! producer got there first. A drain swaps in an empty map and walks the
//! replaced one.
//!
//! Any number of producers and consumers, no lock anywhere — the cost is a
//! full map copy per publish and retry amplification under write contention,
//! which is why `K` and `V` must be `Clone` here and nowhere else in the
//! crate.

use ahash::RandomState;
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::CoalescingBuffer;
use crate::key::EntryKey;
use crate::metrics::stats::{Metrics, StatsCounter};

type Snapshot<K, V> = IndexMap<EntryKey<K>, V, RandomState>;

/// Coalescing buffer backed by an atomically swapped immutable map.
///
/// # Example
/// ```
/// use lungo::{CoalescingBuffer, CowBuffer};
///
/// let buffer: CowBuffer<u64, String> = CowBuffer::new(10);
/// assert!(buffer.offer(1, "vod_a".to_string()));
/// assert!(buffer.offer(1, "vod_b".to_string()));
///
/// let mut out = Vec::new();
/// assert_eq!(buffer.drain(&mut out), 1);
/// assert_eq!(out, vec!["vod_b".to_string()]);
/// ```
pub struct CowBuffer<K, V> {
    map: ArcSwap<Snapshot<K, V>>,
    capacity: usize,
    /// Serial source for non-collapsible entries.
    next_serial: AtomicU64,
    stats: StatsCounter,
}

impl<K, V> CowBuffer<K, V> {
    /// Creates a buffer holding at most `capacity` pending entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        CowBuffer {
            map: ArcSwap::from_pointee(Snapshot::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
            capacity,
            next_serial: AtomicU64::new(0),
            stats: StatsCounter::new(),
        }
    }
}

impl<K, V> CowBuffer<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    fn publish(&self, key: EntryKey<K>, value: V) -> bool {
        let mut current = self.map.load();
        loop {
            let replacing = current.contains_key(&key);
            if !replacing && current.len() == self.capacity {
                // Full with an unseen key: drop without retrying.
                self.stats.record_rejection();
                return false;
            }

            let mut modified = (**current).clone();
            // Overwriting a present key keeps its index, so arrival order
            // survives the copy.
            modified.insert(key.clone(), value.clone());

            let prev = self.map.compare_and_swap(&*current, Arc::new(modified));
            if Arc::ptr_eq(&*prev, &*current) {
                if replacing {
                    self.stats.record_coalesce();
                } else {
                    self.stats.record_offer();
                }
                return true;
            }
            // Another producer replaced the snapshot first; redo the change
            // against what it installed.
            current = prev;
        }
    }
}

impl<K, V> CoalescingBuffer<K, V> for CowBuffer<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    fn offer(&self, key: K, value: V) -> bool {
        self.publish(EntryKey::Keyed(key), value)
    }

    fn offer_non_collapsible(&self, value: V) -> bool {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        self.publish(EntryKey::NonCollapsible(serial), value)
    }

    fn drain(&self, out: &mut Vec<V>) -> usize {
        let empty = Arc::new(Snapshot::with_capacity_and_hasher(
            self.capacity,
            RandomState::new(),
        ));
        let replaced = self.map.swap(empty);

        let moved = replaced.len();
        match Arc::try_unwrap(replaced) {
            Ok(map) => out.extend(map.into_values()),
            // A publisher still holds the replaced snapshot; its CAS will
            // fail and retry against the fresh map, so cloning the values
            // out here loses nothing.
            Err(shared) => out.extend(shared.values().cloned()),
        }
        self.stats.record_drain(moved as u64);
        moved
    }

    fn len(&self) -> usize {
        self.map.load().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn stats(&self) -> Metrics {
        self.stats.snapshot()
    }
}
