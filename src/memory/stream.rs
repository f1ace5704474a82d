// src/memory/stream.rs

//! Growable output buffer backed by the tracked allocator.

use super::tracked::{TrackedAllocator, TrackedPtr};
use crate::constants::DEFAULT_STREAM_CAPACITY;
use crate::errors::{Error, Result};
use std::io::{self, Write};
use std::sync::Arc;

/// Byte buffer that doubles its capacity on demand.
///
/// Storage comes from a [`TrackedAllocator`], so stream buffers show up in the
/// run's memory statistics and get the same corruption checks as plugin
/// allocations.
pub struct StreamBuffer {
    allocator: Arc<TrackedAllocator>,
    ptr: Option<TrackedPtr>,
    len: usize,
    capacity: usize,
}

impl StreamBuffer {
    /// Creates a buffer with `initial_capacity` bytes reserved
    /// (a zero hint uses [`DEFAULT_STREAM_CAPACITY`]).
    pub fn new(allocator: Arc<TrackedAllocator>, initial_capacity: usize) -> Result<Self> {
        let capacity = if initial_capacity == 0 {
            DEFAULT_STREAM_CAPACITY
        } else {
            initial_capacity
        };
        let ptr = allocator.alloc(capacity).ok_or_else(|| {
            Error::OutOfMemory(format!("stream buffer of {} bytes", capacity))
        })?;
        Ok(Self {
            allocator,
            ptr: Some(ptr),
            len: 0,
            capacity,
        })
    }

    /// Appends `data`, growing the buffer if needed.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let needed = self.len + data.len();
        if needed > self.capacity {
            let mut capacity = self.capacity.max(1);
            while capacity < needed {
                capacity *= 2;
            }
            self.ptr = Some(
                self.allocator
                    .realloc(self.ptr, capacity)
                    .ok_or_else(|| Error::OutOfMemory(format!("stream buffer growth to {} bytes", capacity)))?,
            );
            self.capacity = capacity;
        }

        let start = self.len;
        let ptr = self.ptr.ok_or_else(|| Error::OutOfMemory("stream buffer released".into()))?;
        self.allocator
            .with_payload(ptr, |buf| buf[start..needed].copy_from_slice(data))
            .ok_or_else(|| Error::OutOfMemory("stream buffer storage lost".into()))?;
        self.len = needed;
        Ok(())
    }

    /// Writes the buffered bytes to `out` and empties the buffer.
    pub fn flush_to(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let bytes = self.contents();
        out.write_all(&bytes)?;
        self.len = 0;
        Ok(())
    }

    /// Copy of the buffered bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.ptr
            .and_then(|ptr| self.allocator.copy_payload(ptr, self.len))
            .unwrap_or_default()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reserved bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            self.allocator.free(ptr);
        }
    }
}
