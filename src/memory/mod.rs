//! Memory management for the processing pipeline.
//!
//! Two layers live here:
//! * [`BufferPool`]: fixed tiers of reusable read buffers with heap fallback,
//!   used by the content walk for every chunk it reads.
//! * [`TrackedAllocator`]: validated allocations with randomised header magic
//!   and tail canaries, used for plugin-visible memory and [`StreamBuffer`]s.

mod pool;
mod stream;
mod tracked;

pub use pool::{BufferPool, PoolBuffer, PoolStats};
pub use stream::StreamBuffer;
pub use tracked::{FreeOutcome, MemoryStats, TrackedAllocator, TrackedPtr};

use std::sync::Arc;

/// Owns the buffer pool and the tracked allocator for one run.
#[derive(Default)]
pub struct MemoryManager {
    pool: BufferPool,
    tracked: Arc<TrackedAllocator>,
}

impl MemoryManager {
    /// Creates a manager with the default pool tiers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The tracked allocator.
    pub fn tracked(&self) -> &Arc<TrackedAllocator> {
        &self.tracked
    }

    /// Creates a [`StreamBuffer`] backed by this manager's allocator.
    pub fn stream_buffer(&self, initial_capacity: usize) -> crate::errors::Result<StreamBuffer> {
        StreamBuffer::new(self.tracked.clone(), initial_capacity)
    }

    /// Tracked allocation counters.
    pub fn stats(&self) -> MemoryStats {
        self.tracked.stats()
    }

    /// Pool hit/fallback counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
