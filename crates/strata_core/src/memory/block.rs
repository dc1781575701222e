//! # Memory Blocks
//!
//! The contract every backend's block fulfils, and the selector that builds
//! blocks for a pool.

use std::fmt;
use std::io::{self, Write};
use std::ptr::NonNull;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::segment::SegmentBlock;
use super::slot::SlotAllocator;
use crate::diagnostics::BlockStats;
use crate::error::{AllocError, AllocResult, Corruption};

/// One contiguous, aligned buffer handing out sub-ranges.
///
/// Allocation returning `Ok(None)` means "no room here", never an error.
/// `Err` always means the block's bookkeeping is inconsistent.
pub trait MemoryBlock: Send + fmt::Debug {
    /// Backend that manages this block.
    fn backend(&self) -> BackendKind;

    /// Address of the first byte.
    fn base_addr(&self) -> usize;

    /// Size of the buffer in bytes.
    fn memory_size(&self) -> usize;

    /// Alignment of every returned pointer.
    fn alignment(&self) -> usize;

    /// Largest request this block could ever serve.
    fn maximum_allocation_size(&self) -> usize;

    /// Checks if `ptr` lies inside the buffer.
    fn contains(&self, ptr: NonNull<u8>) -> bool;

    /// Allocates `size` bytes.
    ///
    /// # Errors
    ///
    /// [`Corruption`] if the bookkeeping is inconsistent.
    fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, Corruption>;

    /// Releases an allocation of `size` bytes at `ptr`. `ptr` must satisfy
    /// [`MemoryBlock::contains`].
    ///
    /// # Errors
    ///
    /// [`Corruption`] for double frees, wrong sizes or pointers that were
    /// never returned by this block.
    fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), Corruption>;

    /// Checks if no allocation is live.
    fn is_empty(&self) -> bool;

    /// Usage snapshot.
    fn stats(&self) -> BlockStats;

    /// Full consistency check of the bookkeeping.
    ///
    /// # Errors
    ///
    /// The first [`Corruption`] found.
    fn validate(&self) -> Result<(), Corruption>;

    /// Writes a human-readable dump of the block.
    ///
    /// # Errors
    ///
    /// Propagates writer errors.
    fn report(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Backend strategy of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Intrusive free list with split and merge ([`SlotAllocator`]).
    #[default]
    #[serde(alias = "intrusive", alias = "new")]
    Slot,
    /// Out-of-band offset bookkeeping ([`SegmentBlock`]).
    #[serde(alias = "original", alias = "block")]
    Segment,
}

impl BackendKind {
    /// Every backend.
    pub const ALL: [Self; 2] = [Self::Slot, Self::Segment];

    /// Creates an empty block of at least `block_size` bytes.
    ///
    /// # Errors
    ///
    /// Propagates layout and system allocation failures.
    pub fn create_block(self, block_size: usize, alignment: usize) -> AllocResult<Box<dyn MemoryBlock>> {
        Ok(match self {
            Self::Slot => Box::new(SlotAllocator::new(block_size, alignment)?),
            Self::Segment => Box::new(SegmentBlock::new(block_size, alignment)?),
        })
    }

    /// Largest request a pool of this backend serves from blocks.
    ///
    /// Bigger requests go to the large-allocation path.
    #[must_use]
    pub fn maximum_allocation_size(self, alignment: usize) -> usize {
        match self {
            Self::Slot => SlotAllocator::maximum_allocation_size_for(alignment),
            Self::Segment => isize::MAX as usize / 2,
        }
    }

    /// Smallest block that holds one request of `size` bytes.
    #[must_use]
    pub fn block_size_for(self, size: usize, alignment: usize) -> usize {
        match self {
            Self::Slot => SlotAllocator::block_size_for(size, alignment),
            Self::Segment => SegmentBlock::block_size_for(size, alignment),
        }
    }

    /// Lowercase name, as accepted by [`BackendKind::from_str`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Slot => "slot",
            Self::Segment => "segment",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slot" | "intrusive" | "new" => Ok(Self::Slot),
            "segment" | "original" | "block" => Ok(Self::Segment),
            other => Err(AllocError::InvalidConfig(format!("unknown allocator backend '{other}'"))),
        }
    }
}
