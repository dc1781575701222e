//! # Segment Allocator
//!
//! Offset bookkeeping kept outside the managed memory: free and reserved
//! segments live in two ordered maps keyed by offset. [`SegmentBlock`] pairs
//! the bookkeeping with a buffer and is the segment backend's block type.
//!
//! Reservation is best fit. Release coalesces with free neighbours.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ptr::NonNull;

use super::block::{BackendKind, MemoryBlock};
use super::buffer::RawBuffer;
use crate::diagnostics::BlockStats;
use crate::error::{AllocError, AllocResult, Corruption};

/// Minimum alignment of block buffers.
const MIN_BLOCK_ALIGNMENT: usize = 16;

/// Best-fit offset allocator over `[0, total)`.
#[derive(Debug, Clone)]
pub struct SegmentAllocator {
    /// Managed length in bytes.
    total: usize,
    /// Granularity of offsets and lengths.
    alignment: usize,
    /// Free segments: offset -> length.
    available: BTreeMap<usize, usize>,
    /// Reserved segments: offset -> length.
    reserved: BTreeMap<usize, usize>,
}

impl SegmentAllocator {
    /// Creates an allocator whose whole range is one free segment.
    ///
    /// # Arguments
    ///
    /// * `total` - Length of the managed range in bytes
    /// * `alignment` - Power of two every offset and length is rounded to
    #[must_use]
    pub fn new(total: usize, alignment: usize) -> Self {
        let mut available = BTreeMap::new();
        if total > 0 {
            available.insert(0, total);
        }
        Self {
            total,
            alignment: alignment.max(1),
            available,
            reserved: BTreeMap::new(),
        }
    }

    /// Rounds a request to the reservation granularity. Zero-size requests
    /// take one alignment unit so every reservation has a distinct offset.
    #[inline]
    #[must_use]
    pub fn rounded_length(&self, size: usize) -> usize {
        size.max(1).div_ceil(self.alignment) * self.alignment
    }

    /// Reserves `size` bytes and returns their offset.
    ///
    /// Picks the smallest free segment that fits after alignment padding,
    /// lowest offset on ties. Padding and remainder stay free.
    pub fn reserve(&mut self, size: usize) -> Option<usize> {
        let length = self.rounded_length(size);

        let mut best: Option<(usize, usize, usize)> = None;
        for (&offset, &segment) in &self.available {
            let aligned = offset.div_ceil(self.alignment) * self.alignment;
            let padding = aligned - offset;
            if segment < padding || segment - padding < length {
                continue;
            }
            if best.map_or(true, |(_, best_len, _)| segment < best_len) {
                best = Some((offset, segment, aligned));
            }
        }

        let (offset, segment, aligned) = best?;
        self.available.remove(&offset);
        if aligned > offset {
            self.available.insert(offset, aligned - offset);
        }
        let end = aligned + length;
        if offset + segment > end {
            self.available.insert(end, offset + segment - end);
        }
        self.reserved.insert(aligned, length);

        Some(aligned)
    }

    /// Releases the reservation at `offset`.
    ///
    /// Returns `Ok(false)` if nothing is reserved there.
    ///
    /// # Errors
    ///
    /// [`Corruption::ReservationSizeMismatch`] if `size` rounds to a length
    /// other than the reserved one.
    pub fn release(&mut self, offset: usize, size: usize) -> Result<bool, Corruption> {
        let Some(&length) = self.reserved.get(&offset) else {
            return Ok(false);
        };

        let requested = self.rounded_length(size);
        if requested != length {
            return Err(Corruption::ReservationSizeMismatch {
                offset,
                reserved: length,
                requested,
            });
        }
        self.reserved.remove(&offset);

        let mut start = offset;
        let mut merged = length;

        let previous = self
            .available
            .range(..offset)
            .next_back()
            .map(|(&prev_offset, &prev_len)| (prev_offset, prev_len));
        if let Some((prev_offset, prev_len)) = previous {
            if prev_offset + prev_len == offset {
                self.available.remove(&prev_offset);
                start = prev_offset;
                merged += prev_len;
            }
        }

        if let Some(next_len) = self.available.remove(&(offset + length)) {
            merged += next_len;
        }

        self.available.insert(start, merged);
        Ok(true)
    }

    /// Checks that free and reserved segments tile `[0, total)` exactly.
    ///
    /// # Errors
    ///
    /// [`Corruption::SegmentOverlap`] for an overlap or gap,
    /// [`Corruption::CoverageMismatch`] if the segments stop short.
    pub fn validate(&self) -> Result<(), Corruption> {
        let mut segments: Vec<(usize, usize)> = self
            .available
            .iter()
            .chain(self.reserved.iter())
            .map(|(&offset, &length)| (offset, length))
            .collect();
        segments.sort_unstable();

        let mut expected = 0;
        for (offset, length) in segments {
            if offset != expected {
                return Err(Corruption::SegmentOverlap { offset, expected });
            }
            expected = offset + length;
        }

        if expected != self.total {
            return Err(Corruption::CoverageMismatch {
                reached: expected,
                capacity: self.total,
            });
        }
        Ok(())
    }

    /// Returns the managed length in bytes.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Returns the free bytes.
    #[must_use]
    pub fn available_size(&self) -> usize {
        self.available.values().sum()
    }

    /// Returns the reserved bytes.
    #[must_use]
    pub fn reserved_size(&self) -> usize {
        self.reserved.values().sum()
    }

    /// Returns the number of live reservations.
    #[inline]
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.reserved.len()
    }

    /// Returns the number of free segments.
    #[inline]
    #[must_use]
    pub fn free_segment_count(&self) -> usize {
        self.available.len()
    }

    /// Returns the length of the largest free segment.
    #[must_use]
    pub fn largest_free(&self) -> usize {
        self.available.values().copied().max().unwrap_or(0)
    }
}

/// A buffer managed by a [`SegmentAllocator`].
#[derive(Debug)]
pub struct SegmentBlock {
    memory: RawBuffer<u8>,
    segments: SegmentAllocator,
}

impl SegmentBlock {
    /// Allocates a block of at least `block_size` bytes.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidLayout`] for a non power-of-two alignment,
    /// [`AllocError::OutOfMemory`] if the system allocator fails.
    pub fn new(block_size: usize, alignment: usize) -> AllocResult<Self> {
        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidLayout {
                size: block_size,
                alignment,
            });
        }
        let size = Self::block_size_for(block_size, alignment);
        let memory = RawBuffer::zeroed(size, alignment.max(MIN_BLOCK_ALIGNMENT))?;
        Ok(Self {
            memory,
            segments: SegmentAllocator::new(size, alignment),
        })
    }

    /// Smallest block size that can hold `size` bytes.
    #[must_use]
    pub fn block_size_for(size: usize, alignment: usize) -> usize {
        let alignment = alignment.max(1);
        size.max(1).div_ceil(alignment) * alignment
    }

    /// Returns the bookkeeping.
    #[inline]
    #[must_use]
    pub const fn segments(&self) -> &SegmentAllocator {
        &self.segments
    }
}

impl MemoryBlock for SegmentBlock {
    fn backend(&self) -> BackendKind {
        BackendKind::Segment
    }

    fn base_addr(&self) -> usize {
        self.memory.base_addr()
    }

    fn memory_size(&self) -> usize {
        self.memory.byte_len()
    }

    fn alignment(&self) -> usize {
        self.segments.alignment
    }

    fn maximum_allocation_size(&self) -> usize {
        self.segments.total()
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.memory.contains_addr(ptr.as_ptr() as usize)
    }

    fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, Corruption> {
        Ok(self
            .segments
            .reserve(size)
            .and_then(|offset| self.memory.ptr_at(offset)))
    }

    fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), Corruption> {
        let offset = self
            .memory
            .offset_of(ptr)
            .ok_or(Corruption::MisalignedPointer {
                offset: (ptr.as_ptr() as usize).wrapping_sub(self.memory.base_addr()),
            })?;

        if self.segments.release(offset, size)? {
            Ok(())
        } else {
            Err(Corruption::UnknownReservation { offset })
        }
    }

    fn is_empty(&self) -> bool {
        self.segments.reservation_count() == 0
    }

    fn stats(&self) -> BlockStats {
        BlockStats {
            backend: BackendKind::Segment,
            base_addr: self.memory.base_addr(),
            memory_size: self.memory.byte_len(),
            reserved_size: self.segments.reserved_size(),
            available_size: self.segments.available_size(),
            allocations: self.segments.reservation_count(),
            free_regions: self.segments.free_segment_count(),
            largest_free: self.segments.largest_free(),
        }
    }

    fn validate(&self) -> Result<(), Corruption> {
        self.segments.validate()
    }

    fn report(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "    SegmentBlock {:#x}: {} bytes, alignment {}",
            self.memory.base_addr(),
            self.memory.byte_len(),
            self.segments.alignment
        )?;
        for (offset, length) in &self.segments.reserved {
            writeln!(out, "      reserved  [{offset}, {})", offset + length)?;
        }
        for (offset, length) in &self.segments.available {
            writeln!(out, "      available [{offset}, {})", offset + length)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_fit_prefers_smallest_segment() {
        let mut segments = SegmentAllocator::new(1024, 16);
        let a = segments.reserve(64).unwrap();
        let b = segments.reserve(32).unwrap();
        let c = segments.reserve(256).unwrap();
        let _d = segments.reserve(16).unwrap();

        assert!(segments.release(a, 64).unwrap());
        assert!(segments.release(c, 256).unwrap());

        // The 64-byte hole beats the 256-byte hole and the tail.
        assert_eq!(segments.reserve(48), Some(a));
        let _ = b;
        segments.validate().unwrap();
    }

    #[test]
    fn test_release_coalesces_neighbours() {
        let mut segments = SegmentAllocator::new(1024, 16);
        let a = segments.reserve(100).unwrap();
        let b = segments.reserve(100).unwrap();
        let c = segments.reserve(100).unwrap();

        segments.release(a, 100).unwrap();
        segments.release(c, 100).unwrap();
        assert_eq!(segments.free_segment_count(), 2);

        segments.release(b, 100).unwrap();
        assert_eq!(segments.free_segment_count(), 1);
        assert_eq!(segments.largest_free(), 1024);
        segments.validate().unwrap();
    }

    #[test]
    fn test_lengths_are_rounded() {
        let mut segments = SegmentAllocator::new(256, 16);
        let zero = segments.reserve(0).unwrap();
        let odd = segments.reserve(17).unwrap();
        assert_eq!(odd - zero, 16);
        assert_eq!(segments.reserved_size(), 48);
        assert!(segments.release(odd, 32).unwrap());
    }

    #[test]
    fn test_unknown_release_returns_false() {
        let mut segments = SegmentAllocator::new(256, 16);
        let a = segments.reserve(32).unwrap();
        assert!(!segments.release(a + 16, 16).unwrap());
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let mut segments = SegmentAllocator::new(256, 16);
        let a = segments.reserve(32).unwrap();
        assert_eq!(
            segments.release(a, 64),
            Err(Corruption::ReservationSizeMismatch {
                offset: a,
                reserved: 32,
                requested: 64,
            })
        );
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut segments = SegmentAllocator::new(64, 16);
        assert!(segments.reserve(64).is_some());
        assert!(segments.reserve(1).is_none());
    }

    #[test]
    fn test_block_round_trip() {
        let mut block = SegmentBlock::new(4096, 16).unwrap();
        let ptr = block.allocate(100).unwrap().unwrap();
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        assert!(block.contains(ptr));
        assert!(!block.is_empty());

        block.deallocate(ptr, 100).unwrap();
        assert!(block.is_empty());
        assert!(matches!(
            block.deallocate(ptr, 100),
            Err(Corruption::UnknownReservation { offset: 0 })
        ));
    }
}
