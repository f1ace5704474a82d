// src/memory/pool.rs

//! Tiered buffer pool with heap fallback.

use crate::constants::POOL_TIERS;
use crate::sync::lock;
use log::trace;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Counters describing how requests were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests served from a tier buffer.
    pub hits: usize,
    /// Requests served by a fresh heap allocation.
    pub heap_fallbacks: usize,
}

struct Slot {
    size: usize,
    /// Address of `storage` while it is parked in the pool. Stays fixed for
    /// the life of the pool because boxed slices never move their data.
    addr: usize,
    /// `None` while the buffer is checked out.
    storage: Option<Box<[u8]>>,
}

struct PoolState {
    slots: Vec<Slot>,
    stats: PoolStats,
}

/// Fixed-count, fixed-size buffer tiers shared by the content walk.
///
/// [`BufferPool::get`] hands out the smallest free tier buffer that can hold
/// the request, or a heap allocation when no tier buffer qualifies. Buffers
/// come back when the returned [`PoolBuffer`] is dropped. The pool tells tier
/// buffers from heap fallbacks by comparing addresses against its own slots,
/// never by a flag carried on the buffer.
///
/// # Examples
///
/// ```
/// use fconcat::memory::BufferPool;
///
/// let pool = BufferPool::new();
/// let first = pool.get(100);
/// let addr = first.as_ptr();
/// assert_eq!(first.len(), 4096);
/// drop(first);
///
/// assert_eq!(pool.get(100).as_ptr(), addr);
/// ```
pub struct BufferPool {
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a pool with the default tiers (20×4 KiB, 10×16 KiB, 5×64 KiB).
    pub fn new() -> Self {
        Self::with_tiers(&POOL_TIERS)
    }

    /// Creates a pool from `(buffer size, count)` tiers, given smallest first.
    pub fn with_tiers(tiers: &[(usize, usize)]) -> Self {
        let mut slots = Vec::with_capacity(tiers.iter().map(|(_, count)| count).sum());
        for &(size, count) in tiers {
            for _ in 0..count {
                let storage = vec![0u8; size].into_boxed_slice();
                slots.push(Slot {
                    size,
                    addr: storage.as_ptr() as usize,
                    storage: Some(storage),
                });
            }
        }
        Self {
            state: Mutex::new(PoolState {
                slots,
                stats: PoolStats::default(),
            }),
        }
    }

    /// Returns a buffer of at least `size` bytes.
    ///
    /// The buffer is exactly as long as the tier it came from, or `size` bytes
    /// (minimum one) for a heap fallback.
    pub fn get(&self, size: usize) -> PoolBuffer<'_> {
        let mut state = lock(&self.state);

        let mut best: Option<usize> = None;
        for (index, slot) in state.slots.iter().enumerate() {
            if slot.storage.is_none() || slot.size < size {
                continue;
            }
            match best {
                Some(current) if state.slots[current].size <= slot.size => {}
                _ => best = Some(index),
            }
        }

        let data = match best.and_then(|index| state.slots[index].storage.take()) {
            Some(storage) => {
                state.stats.hits += 1;
                storage
            }
            None => {
                state.stats.heap_fallbacks += 1;
                trace!("Buffer pool exhausted for {} bytes, using heap", size);
                vec![0u8; size.max(1)].into_boxed_slice()
            }
        };

        PoolBuffer {
            pool: self,
            data: Some(data),
        }
    }

    /// Returns `buffer` to the pool. Equivalent to dropping it.
    pub fn release(&self, buffer: PoolBuffer<'_>) {
        drop(buffer);
    }

    /// Snapshot of the hit/fallback counters.
    pub fn stats(&self) -> PoolStats {
        lock(&self.state).stats
    }

    /// Number of tier buffers currently parked in the pool.
    pub fn available(&self) -> usize {
        lock(&self.state)
            .slots
            .iter()
            .filter(|slot| slot.storage.is_some())
            .count()
    }

    fn give_back(&self, data: Box<[u8]>) {
        let addr = data.as_ptr() as usize;
        let mut state = lock(&self.state);
        if let Some(slot) = state
            .slots
            .iter_mut()
            .find(|slot| slot.addr == addr && slot.storage.is_none())
        {
            slot.storage = Some(data);
        }
        // Anything else was a heap fallback and is freed here.
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to the whole buffer; callers slice it to the bytes they use.
pub struct PoolBuffer<'a> {
    pool: &'a BufferPool,
    data: Option<Box<[u8]>>,
}

impl PoolBuffer<'_> {
    /// Address of the first byte, for identity checks.
    pub fn as_ptr(&self) -> *const u8 {
        self.deref().as_ptr()
    }
}

impl Deref for PoolBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PoolBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PoolBuffer<'_> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.give_back(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_prefers_smallest_fitting_tier() {
        let pool = BufferPool::new();
        assert_eq!(pool.get(1).len(), 4096);
        assert_eq!(pool.get(4096).len(), 4096);
        assert_eq!(pool.get(4097).len(), 16384);
        assert_eq!(pool.get(20000).len(), 65536);
        assert_eq!(pool.stats().hits, 4);
    }

    #[test]
    fn test_release_then_get_returns_same_buffer() {
        let pool = BufferPool::new();
        let buffer = pool.get(100);
        let addr = buffer.as_ptr();
        pool.release(buffer);

        let again = pool.get(100);
        assert_eq!(again.as_ptr(), addr);
    }

    #[test]
    fn test_oversized_request_falls_back_to_heap() {
        let pool = BufferPool::new();
        let before = pool.available();
        let big = pool.get(100_000);
        assert_eq!(big.len(), 100_000);
        assert_eq!(pool.available(), before);
        assert_eq!(pool.stats().heap_fallbacks, 1);

        drop(big);
        assert_eq!(pool.available(), before);
    }

    #[test]
    fn test_exhausted_tier_spills_to_larger_tier_then_heap() {
        let pool = BufferPool::with_tiers(&[(8, 1), (16, 1)]);
        let a = pool.get(4);
        let b = pool.get(4);
        let c = pool.get(4);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 16);
        assert_eq!(c.len(), 4);
        assert_eq!(pool.stats().heap_fallbacks, 1);

        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_heap_buffer_never_enters_pool() {
        let pool = BufferPool::with_tiers(&[(8, 1)]);
        let pooled = pool.get(8);
        let heap = pool.get(8);
        let heap_addr = heap.as_ptr();
        drop(heap);
        assert_eq!(pool.available(), 0);

        drop(pooled);
        assert_eq!(pool.available(), 1);
        assert_ne!(pool.get(8).as_ptr(), heap_addr);
    }
}
