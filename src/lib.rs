mod buffer;
mod builder;
mod cow;
mod key;
mod locked;
mod metrics;
mod ring;

pub use buffer::CoalescingBuffer;
pub use builder::{BufferBuilder, Variant};
pub use cow::CowBuffer;
pub use locked::LockedBuffer;
pub use metrics::stats::Metrics;
pub use ring::RingBuffer;
