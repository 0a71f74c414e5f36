use std::hash::Hash;

use crate::buffer::CoalescingBuffer;
use crate::cow::CowBuffer;
use crate::locked::LockedBuffer;
use crate::ring::RingBuffer;

/// Which implementation a [`BufferBuilder`] constructs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Variant {
    /// The wait-free ring: exactly one producer thread and one consumer
    /// thread. The default.
    #[default]
    WaitFree,
    /// The mutex-serialized map: any number of producers and consumers.
    Locked,
    /// The copy-on-write map: any number of producers and consumers, one
    /// map copy per publish.
    CopyOnWrite,
}

/// Builder for selecting a buffer variant and capacity at startup.
///
/// # Example
/// ```
/// use lungo::{BufferBuilder, CoalescingBuffer, Variant};
///
/// let buffer = BufferBuilder::new(1_024)
///     .variant(Variant::Locked)
///     .build::<u64, String>();
///
/// assert!(buffer.offer(1, "snapshot".to_string()));
/// assert_eq!(buffer.capacity(), 1_024);
/// ```
pub struct BufferBuilder {
    capacity: usize,
    variant: Variant,
}

impl BufferBuilder {
    /// Starts a builder for a buffer of at most `capacity` pending entries.
    ///
    /// The wait-free variant rounds `capacity` up to the next power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        BufferBuilder {
            capacity,
            variant: Variant::WaitFree,
        }
    }

    /// Selects the implementation to construct (default: [`Variant::WaitFree`]).
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Constructs the selected variant behind the common contract.
    ///
    /// The bounds are the union of what the variants need: `Clone` is only
    /// exercised by [`Variant::CopyOnWrite`], `Hash` only by the map-backed
    /// variants. Callers that want the minimal bounds of one variant can use
    /// its `new` constructor directly.
    pub fn build<K, V>(self) -> Box<dyn CoalescingBuffer<K, V> + Send + Sync>
    where
        K: Clone + Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match self.variant {
            Variant::WaitFree => Box::new(RingBuffer::new(self.capacity)),
            Variant::Locked => Box::new(LockedBuffer::new(self.capacity)),
            Variant::CopyOnWrite => Box::new(CowBuffer::new(self.capacity)),
        }
    }
}
