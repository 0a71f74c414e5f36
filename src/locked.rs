//! Mutex-serialized coalescing buffer.
//!
//! The trivially correct variant: an insertion-ordered map behind a single
//! `parking_lot::Mutex`. Safe for any number of producers and consumers,
//! at the cost of serializing every operation through the lock. Use it as
//! the drop-in choice when the one-producer / one-consumer contract of
//! [`RingBuffer`] cannot be guaranteed and publish rates are modest.
//!
//! [`RingBuffer`]: crate::RingBuffer

use ahash::RandomState;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;

use crate::buffer::CoalescingBuffer;
use crate::key::EntryKey;
use crate::metrics::stats::{Metrics, StatsCounter};

struct State<K, V> {
    map: IndexMap<EntryKey<K>, V, RandomState>,
    /// Serial source for non-collapsible entries.
    next_serial: u64,
}

/// Coalescing buffer serialized by a single lock.
///
/// Entries keep their arrival position because the backing map is
/// insertion-ordered: overwriting a present key leaves its index unchanged,
/// and draining walks the map in index order.
///
/// # Example
/// ```
/// use lungo::{CoalescingBuffer, LockedBuffer};
///
/// let buffer: LockedBuffer<u64, &str> = LockedBuffer::new(10);
/// assert!(buffer.offer(1, "vod_a"));
/// assert!(buffer.offer(1, "vod_b"));
///
/// let mut out = Vec::new();
/// assert_eq!(buffer.drain(&mut out), 1);
/// assert_eq!(out, vec!["vod_b"]);
/// ```
pub struct LockedBuffer<K, V> {
    state: Mutex<State<K, V>>,
    capacity: usize,
    stats: StatsCounter,
}

impl<K, V> LockedBuffer<K, V> {
    /// Creates a buffer holding at most `capacity` pending entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        LockedBuffer {
            state: Mutex::new(State {
                map: IndexMap::with_capacity_and_hasher(capacity, RandomState::new()),
                next_serial: 0,
            }),
            capacity,
            stats: StatsCounter::new(),
        }
    }
}

impl<K: Hash + Eq, V> CoalescingBuffer<K, V> for LockedBuffer<K, V> {
    fn offer(&self, key: K, value: V) -> bool {
        let key = EntryKey::Keyed(key);
        let mut state = self.state.lock();

        if state.map.contains_key(&key) {
            // Overwrite in place; the map keeps the entry's index.
            state.map.insert(key, value);
            self.stats.record_coalesce();
            return true;
        }
        if state.map.len() == self.capacity {
            self.stats.record_rejection();
            return false;
        }
        state.map.insert(key, value);
        self.stats.record_offer();
        true
    }

    fn offer_non_collapsible(&self, value: V) -> bool {
        let mut state = self.state.lock();

        if state.map.len() == self.capacity {
            self.stats.record_rejection();
            return false;
        }
        let serial = state.next_serial;
        state.next_serial += 1;
        state.map.insert(EntryKey::NonCollapsible(serial), value);
        self.stats.record_offer();
        true
    }

    fn drain(&self, out: &mut Vec<V>) -> usize {
        let mut state = self.state.lock();
        let moved = state.map.len();
        for (_, value) in state.map.drain(..) {
            out.push(value);
        }
        self.stats.record_drain(moved as u64);
        moved
    }

    fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn stats(&self) -> Metrics {
        self.stats.snapshot()
    }
}
