// src/memory/tracked.rs

//! Tracked allocator with header magic, tail canary and double-free detection.
//!
//! Every allocation is laid out as
//!
//! ```text
//! [ size: u64 | magic: u64 | payload ... | canary: u64 ]
//! ```
//!
//! The payload address is what callers (and C plugins) see. The allocator
//! keeps the backing storage itself and only ever looks up addresses it handed
//! out, so a bad pointer from a plugin is reported instead of dereferenced.
//!
//! A freed block shrinks to its header, restamped with the freed magic, and
//! stays registered until [`RETIRED_LIMIT`] later frees have pushed it out.

use crate::sync::lock;
use log::{error, warn};
use once_cell::sync::Lazy;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const WORD: usize = std::mem::size_of::<u64>();
const HEADER_SIZE: usize = 2 * WORD;
const MAGIC_OFFSET: usize = WORD;

/// Number of freed headers kept for double-free detection.
pub const RETIRED_LIMIT: usize = 4096;

/// Per-process magic values.
#[derive(Debug, Clone, Copy)]
struct Magics {
    live: u64,
    freed: u64,
    canary: u64,
}

static MAGICS: Lazy<Magics> = Lazy::new(|| {
    let mut next = random_source();
    let live = next();
    let mut freed = next();
    while freed == live {
        freed = next();
    }
    let mut canary = next();
    while canary == live || canary == freed {
        canary = next();
    }
    Magics {
        live,
        freed,
        canary,
    }
});

/// OS randomness when available, a PID/time seeded generator otherwise.
fn random_source() -> Box<dyn FnMut() -> u64> {
    if OsRng.try_next_u64().is_ok() {
        return Box::new(|| {
            OsRng
                .try_next_u64()
                .unwrap_or_else(|_| fallback_seed().rotate_left(17))
        });
    }
    warn!("OS random source unavailable, seeding allocator magic from pid and time");
    let mut rng = StdRng::seed_from_u64(fallback_seed());
    Box::new(move || rng.random::<u64>())
}

fn fallback_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ (u64::from(std::process::id()) << 32)
}

/// Address of a tracked payload.
///
/// This is a plain address token: copying it does not copy or own memory,
/// and handing the same token to [`TrackedAllocator::free`] twice is how a
/// double free shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedPtr(NonNull<u8>);

// SAFETY: the token is never dereferenced outside the allocator lock or the
// plugin ABI, which has its own contract about payload access.
unsafe impl Send for TrackedPtr {}
unsafe impl Sync for TrackedPtr {}

impl TrackedPtr {
    /// Raw payload pointer, for handing to plugins.
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Wraps a pointer received from a plugin. Returns `None` for null.
    pub fn from_raw(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Sum of all payload sizes ever allocated.
    pub total_allocated: usize,
    /// Sum of all payload sizes ever freed.
    pub total_freed: usize,
    /// Bytes currently live.
    pub current_usage: usize,
    /// Highest value `current_usage` has reached.
    pub peak_usage: usize,
    /// Number of successful allocations.
    pub allocation_count: usize,
    /// Number of successful frees.
    pub free_count: usize,
}

/// Result of a [`TrackedAllocator::free`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The block was released.
    Freed,
    /// The tail canary was overwritten; the block was released anyway.
    FreedWithCorruptCanary,
    /// The pointer was already freed. Nothing was done.
    DoubleFree,
    /// The header magic matched neither known value. Nothing was done.
    CorruptHeader,
    /// The pointer was never handed out by this allocator. Nothing was done.
    UnknownPointer,
}

struct Block {
    bytes: Vec<u8>,
}

impl Block {
    fn new(size: usize, magics: &Magics) -> Self {
        let mut bytes = vec![0u8; HEADER_SIZE + size + WORD];
        bytes[..WORD].copy_from_slice(&(size as u64).to_le_bytes());
        bytes[MAGIC_OFFSET..HEADER_SIZE].copy_from_slice(&magics.live.to_le_bytes());
        bytes[HEADER_SIZE + size..].copy_from_slice(&magics.canary.to_le_bytes());
        Self { bytes }
    }

    fn word_at(&self, offset: usize) -> u64 {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.bytes[offset..offset + WORD]);
        u64::from_le_bytes(word)
    }

    /// Payload size as allocated. The header copy is not trusted for this.
    fn size(&self) -> usize {
        self.bytes.len() - HEADER_SIZE - WORD
    }

    fn magic(&self) -> u64 {
        self.word_at(MAGIC_OFFSET)
    }

    fn canary(&self) -> u64 {
        self.word_at(HEADER_SIZE + self.size())
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..HEADER_SIZE + self.size()]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        &mut self.bytes[HEADER_SIZE..HEADER_SIZE + size]
    }

    /// Drops the payload and canary, keeping a header stamped as freed.
    fn retire(&mut self, magics: &Magics) {
        self.bytes.truncate(HEADER_SIZE);
        self.bytes.shrink_to_fit();
        self.bytes[MAGIC_OFFSET..HEADER_SIZE].copy_from_slice(&magics.freed.to_le_bytes());
    }

    fn is_retired(&self) -> bool {
        self.bytes.len() == HEADER_SIZE
    }

    fn payload_ptr(&mut self) -> Option<TrackedPtr> {
        // SAFETY: HEADER_SIZE is within the allocation, which always holds
        // the header and the canary.
        let ptr = unsafe { self.bytes.as_mut_ptr().add(HEADER_SIZE) };
        TrackedPtr::from_raw(ptr)
    }
}

#[derive(Default)]
struct TrackerState {
    /// Live blocks and retired headers, by payload address.
    blocks: HashMap<usize, Block>,
    /// Retired addresses, oldest first.
    retired: VecDeque<usize>,
    stats: MemoryStats,
}

impl TrackerState {
    fn live(&self, addr: usize) -> Option<&Block> {
        self.blocks.get(&addr).filter(|block| !block.is_retired())
    }

    fn live_mut(&mut self, addr: usize) -> Option<&mut Block> {
        self.blocks.get_mut(&addr).filter(|block| !block.is_retired())
    }

    fn retire(&mut self, addr: usize, magics: &Magics) {
        if let Some(block) = self.blocks.get_mut(&addr) {
            block.retire(magics);
        }
        self.retired.push_back(addr);
        while self.retired.len() > RETIRED_LIMIT {
            let Some(oldest) = self.retired.pop_front() else {
                break;
            };
            // The address may have been handed out again since.
            if self.blocks.get(&oldest).is_some_and(Block::is_retired) {
                self.blocks.remove(&oldest);
            }
        }
    }
}

/// Allocator that validates every free and reallocation.
///
/// * A second `free` of the same pointer is reported as a double free and
///   refused, as long as the freed header is still retained.
/// * A header whose magic matches neither the live nor the freed value is
///   reported as corrupt and refused; the block is deliberately leaked.
/// * An overwritten tail canary is reported, but the block is still freed.
///
/// Magic values are randomised once per process.
#[derive(Default)]
pub struct TrackedAllocator {
    state: Mutex<TrackerState>,
}

impl TrackedAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` zeroed bytes. Returns `None` for a zero size.
    pub fn alloc(&self, size: usize) -> Option<TrackedPtr> {
        if size == 0 {
            return None;
        }
        let mut block = Block::new(size, &MAGICS);
        let ptr = block.payload_ptr()?;

        let mut state = lock(&self.state);
        state.blocks.insert(ptr.addr(), block);
        let stats = &mut state.stats;
        stats.total_allocated += size;
        stats.current_usage += size;
        stats.allocation_count += 1;
        stats.peak_usage = stats.peak_usage.max(stats.current_usage);
        Some(ptr)
    }

    /// Frees a tracked pointer, validating header and canary first.
    pub fn free(&self, ptr: TrackedPtr) -> FreeOutcome {
        let mut state = lock(&self.state);
        let magics = *MAGICS;

        let Some(block) = state.blocks.get(&ptr.addr()) else {
            error!(
                "Free of pointer {:p} not owned by the tracked allocator",
                ptr.as_ptr()
            );
            return FreeOutcome::UnknownPointer;
        };

        let magic = block.magic();
        if magic == magics.freed {
            error!("Double free detected at {:p}", ptr.as_ptr());
            return FreeOutcome::DoubleFree;
        }
        if magic != magics.live {
            error!(
                "Corrupted allocation header at {:p}, refusing to free",
                ptr.as_ptr()
            );
            return FreeOutcome::CorruptHeader;
        }
        let size = block.size();
        let canary_ok = block.canary() == magics.canary;

        state.retire(ptr.addr(), &magics);
        let stats = &mut state.stats;
        stats.total_freed += size;
        stats.current_usage = stats.current_usage.saturating_sub(size);
        stats.free_count += 1;

        if canary_ok {
            FreeOutcome::Freed
        } else {
            warn!(
                "Buffer overflow detected: tail canary of {} byte allocation at {:p} was overwritten",
                size,
                ptr.as_ptr()
            );
            FreeOutcome::FreedWithCorruptCanary
        }
    }

    /// Resizes an allocation.
    ///
    /// * `realloc(None, n)` behaves like `alloc(n)`.
    /// * `realloc(Some(p), 0)` frees `p` and returns `None`.
    /// * Otherwise the header magic and the canary are validated; on failure
    ///   the call is refused, `p` stays untouched and `None` is returned. On
    ///   success the payload is copied into a new block with a fresh canary.
    pub fn realloc(&self, ptr: Option<TrackedPtr>, size: usize) -> Option<TrackedPtr> {
        let Some(old) = ptr else {
            return self.alloc(size);
        };
        if size == 0 {
            self.free(old);
            return None;
        }

        let payload = {
            let state = lock(&self.state);
            let magics = *MAGICS;
            let Some(block) = state.live(old.addr()) else {
                error!("Realloc of untracked or freed pointer {:p}", old.as_ptr());
                return None;
            };
            if block.magic() != magics.live {
                error!("Corrupted allocation header at {:p}, refusing realloc", old.as_ptr());
                return None;
            }
            if block.canary() != magics.canary {
                error!("Tail canary overwritten at {:p}, refusing realloc", old.as_ptr());
                return None;
            }
            let keep = block.size().min(size);
            block.payload()[..keep].to_vec()
        };

        let new = self.alloc(size)?;
        self.with_payload(new, |buf| buf[..payload.len()].copy_from_slice(&payload));
        self.free(old);
        Some(new)
    }

    /// Runs `f` on the payload of a live allocation.
    pub fn with_payload<R>(&self, ptr: TrackedPtr, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut state = lock(&self.state);
        state.live_mut(ptr.addr()).map(|block| f(block.payload_mut()))
    }

    /// Copies the first `len` payload bytes of a live allocation.
    ///
    /// Returns `None` if the pointer is not live or `len` exceeds the payload.
    pub fn copy_payload(&self, ptr: TrackedPtr, len: usize) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        let block = state.live(ptr.addr())?;
        block.payload().get(..len).map(<[u8]>::to_vec)
    }

    /// Payload size of a live allocation.
    pub fn size_of(&self, ptr: TrackedPtr) -> Option<usize> {
        lock(&self.state).live(ptr.addr()).map(Block::size)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MemoryStats {
        lock(&self.state).stats
    }

    #[cfg(test)]
    fn header_magic(&self, ptr: TrackedPtr) -> Option<u64> {
        lock(&self.state).blocks.get(&ptr.addr()).map(Block::magic)
    }

    #[cfg(test)]
    fn registered_blocks(&self) -> usize {
        lock(&self.state).blocks.len()
    }

    #[cfg(test)]
    fn corrupt(&self, ptr: TrackedPtr, offset_from_payload: isize, byte: u8) {
        let mut state = lock(&self.state);
        if let Some(block) = state.live_mut(ptr.addr()) {
            let index = (HEADER_SIZE as isize + offset_from_payload) as usize;
            block.bytes[index] ^= byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_values_are_distinct() {
        let magics = *MAGICS;
        assert_ne!(magics.live, magics.freed);
        assert_ne!(magics.canary, magics.live);
        assert_ne!(magics.canary, magics.freed);
    }

    #[test]
    fn test_alloc_updates_stats() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(100);
        assert!(ptr.is_some());

        let stats = allocator.stats();
        assert_eq!(stats.total_allocated, 100);
        assert_eq!(stats.current_usage, 100);
        assert_eq!(stats.peak_usage, 100);
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.free_count, 0);
    }

    #[test]
    fn test_free_updates_stats() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(256).expect("alloc");
        assert_eq!(allocator.free(ptr), FreeOutcome::Freed);

        let stats = allocator.stats();
        assert_eq!(stats.total_freed, 256);
        assert_eq!(stats.current_usage, 0);
        assert_eq!(stats.peak_usage, 256);
        assert_eq!(stats.free_count, 1);
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let allocator = TrackedAllocator::new();
        let p1 = allocator.alloc(100).expect("p1");
        let p2 = allocator.alloc(200).expect("p2");
        let p3 = allocator.alloc(300).expect("p3");
        assert_eq!(allocator.stats().current_usage, 600);

        allocator.free(p2);
        let stats = allocator.stats();
        assert_eq!(stats.current_usage, 400);
        assert_eq!(stats.peak_usage, 600);

        allocator.free(p1);
        allocator.free(p3);
        assert_eq!(allocator.stats().current_usage, 0);
    }

    #[test]
    fn test_double_free_is_detected_and_harmless() {
        let allocator = TrackedAllocator::new();
        let victim = allocator.alloc(64).expect("victim");
        let bystander = allocator.alloc(32).expect("bystander");
        allocator.with_payload(bystander, |buf| buf.fill(7));

        assert_eq!(allocator.free(victim), FreeOutcome::Freed);
        let after_first = allocator.stats();
        assert_eq!(allocator.free(victim), FreeOutcome::DoubleFree);
        assert_eq!(allocator.stats(), after_first);

        assert_eq!(allocator.copy_payload(bystander, 32), Some(vec![7u8; 32]));
        assert_eq!(allocator.free(bystander), FreeOutcome::Freed);
    }

    #[test]
    fn test_free_stamps_freed_magic() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(48).expect("alloc");
        assert_eq!(allocator.header_magic(ptr), Some(MAGICS.live));

        assert_eq!(allocator.free(ptr), FreeOutcome::Freed);
        assert_eq!(allocator.header_magic(ptr), Some(MAGICS.freed));
        assert_eq!(allocator.size_of(ptr), None);
        assert_eq!(allocator.free(ptr), FreeOutcome::DoubleFree);
    }

    #[test]
    fn test_retired_headers_are_bounded() {
        let allocator = TrackedAllocator::new();
        let keep = allocator.alloc(8).expect("keep");
        for _ in 0..RETIRED_LIMIT + 64 {
            let ptr = allocator.alloc(8).expect("alloc");
            allocator.free(ptr);
        }
        assert!(allocator.registered_blocks() <= RETIRED_LIMIT + 1);
        assert_eq!(allocator.size_of(keep), Some(8));
        assert_eq!(allocator.free(keep), FreeOutcome::Freed);
    }

    #[test]
    fn test_corrupt_header_refuses_free() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(16).expect("alloc");
        allocator.corrupt(ptr, -1, 0xFF);

        assert_eq!(allocator.free(ptr), FreeOutcome::CorruptHeader);
        assert_eq!(allocator.stats().current_usage, 16);
        assert_eq!(allocator.stats().free_count, 0);
    }

    #[test]
    fn test_corrupt_canary_still_frees() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(16).expect("alloc");
        allocator.corrupt(ptr, 16, 0x01);

        assert_eq!(allocator.free(ptr), FreeOutcome::FreedWithCorruptCanary);
        assert_eq!(allocator.stats().current_usage, 0);
    }

    #[test]
    fn test_unknown_pointer_is_refused() {
        let allocator = TrackedAllocator::new();
        let mut local = 0u8;
        let ptr = TrackedPtr::from_raw(&mut local).expect("non-null");
        assert_eq!(allocator.free(ptr), FreeOutcome::UnknownPointer);
    }

    #[test]
    fn test_realloc_null_allocates() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.realloc(None, 100);
        assert!(ptr.is_some());
        assert_eq!(allocator.stats().current_usage, 100);
    }

    #[test]
    fn test_realloc_zero_frees() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(100).expect("alloc");
        assert!(allocator.realloc(Some(ptr), 0).is_none());

        let stats = allocator.stats();
        assert_eq!(stats.current_usage, 0);
        assert_eq!(stats.free_count, 1);
    }

    #[test]
    fn test_realloc_preserves_payload_and_restamps_canary() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(4).expect("alloc");
        allocator.with_payload(ptr, |buf| buf.copy_from_slice(b"abcd"));

        let grown = allocator.realloc(Some(ptr), 8).expect("grow");
        assert_eq!(allocator.copy_payload(grown, 4), Some(b"abcd".to_vec()));
        assert_eq!(allocator.size_of(grown), Some(8));
        assert_eq!(allocator.free(grown), FreeOutcome::Freed);
        assert_eq!(allocator.stats().current_usage, 0);
    }

    #[test]
    fn test_realloc_refuses_corrupt_canary() {
        let allocator = TrackedAllocator::new();
        let ptr = allocator.alloc(8).expect("alloc");
        allocator.corrupt(ptr, 8, 0x10);
        assert!(allocator.realloc(Some(ptr), 16).is_none());
        assert_eq!(allocator.size_of(ptr), Some(8));
    }
}
