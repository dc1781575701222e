//! # Large Allocations
//!
//! Requests a pool cannot serve are taken straight from the system with the
//! pool's alignment and tracked here until they are released.

use std::collections::HashMap;
use std::ptr::NonNull;

use super::buffer::RawBuffer;
use crate::error::AllocResult;

/// An owned large allocation.
#[derive(Debug)]
pub struct LargeAllocation {
    /// The allocation itself.
    buffer: RawBuffer<u8>,
    /// Size requested by the caller.
    requested: usize,
}

impl LargeAllocation {
    /// Returns the size requested by the caller.
    #[inline]
    #[must_use]
    pub const fn requested(&self) -> usize {
        self.requested
    }

    /// Returns the bytes obtained from the system.
    #[inline]
    #[must_use]
    pub const fn memory_size(&self) -> usize {
        self.buffer.byte_len()
    }

    /// Returns the alignment of the allocation.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.buffer.alignment()
    }
}

/// Address-keyed registry of live large allocations.
#[derive(Debug, Default)]
pub struct LargeAllocations {
    /// Map from returned address to allocation.
    allocations: HashMap<usize, LargeAllocation>,
    /// Bytes currently held.
    total_bytes: usize,
}

impl LargeAllocations {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` zeroed bytes aligned to `alignment` and records them.
    ///
    /// # Errors
    ///
    /// Propagates layout and system allocation failures.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        let buffer = RawBuffer::<u8>::zeroed(size, alignment)?;
        let ptr = buffer.base_ptr();

        self.total_bytes += buffer.byte_len();
        self.allocations.insert(
            buffer.base_addr(),
            LargeAllocation {
                buffer,
                requested: size,
            },
        );
        Ok(ptr)
    }

    /// Releases the allocation at `ptr`. Returns `None` if `ptr` is not a
    /// live large allocation.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Option<LargeAllocation> {
        let allocation = self.allocations.remove(&(ptr.as_ptr() as usize))?;
        self.total_bytes -= allocation.memory_size();
        Some(allocation)
    }

    /// Returns the number of live allocations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    /// Checks if no allocation is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Returns the bytes currently held.
    #[inline]
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Iterates over `(address, allocation)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LargeAllocation)> {
        self.allocations.iter().map(|(&addr, allocation)| (addr, allocation))
    }
}
