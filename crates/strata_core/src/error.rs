//! # Allocator Error Types
//!
//! All errors that can occur in the allocator subsystem.
//!
//! Capacity exhaustion is never an error: it triggers block growth or the
//! large-allocation path. [`AllocError`] covers failures of the system
//! allocator and bad configuration. [`Corruption`] covers inconsistent
//! bookkeeping, which always points at earlier misuse (double free, wrong
//! size on deallocate, out-of-bounds write) and is treated as fatal.

use thiserror::Error;

/// Errors that can occur while allocating, configuring or validating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The system allocator refused a block or large allocation.
    #[error("system allocation failed: {size} bytes aligned to {alignment}")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },

    /// Size and alignment do not form a valid layout.
    #[error("invalid layout: size {size}, alignment {alignment}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },

    /// A slot block would hold more elements than a 32-bit position can address.
    #[error("block of {size} bytes exceeds the addressable element range")]
    BlockTooLarge {
        /// Requested block size in bytes.
        size: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(String),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(String),

    /// Bookkeeping inconsistency detected.
    #[error("heap corruption: {0}")]
    Corruption(#[from] Corruption),
}

/// Bookkeeping inconsistencies found in a block.
///
/// Positions are block-relative element indices for the slot backend and
/// byte offsets for the segment backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// A slot header with a forward span of zero.
    #[error("zero-length span at position {position}")]
    ZeroSpan {
        /// Slot position.
        position: usize,
    },

    /// Deallocation of a slot that is already free.
    #[error("double free of slot at position {position}")]
    DoubleFree {
        /// Slot position.
        position: usize,
    },

    /// A status field holding neither Free nor Allocated.
    #[error("invalid status {status} at position {position}")]
    InvalidStatus {
        /// Slot position.
        position: usize,
        /// Raw status bits.
        status: u32,
    },

    /// A position outside the block.
    #[error("position {position} outside block capacity {capacity}")]
    PositionOutOfRange {
        /// Offending position.
        position: usize,
        /// Block capacity in elements.
        capacity: usize,
    },

    /// A pointer inside the block that cannot start a payload.
    #[error("pointer at byte offset {offset} is not a payload start")]
    MisalignedPointer {
        /// Byte offset from the block base.
        offset: usize,
    },

    /// Deallocation size larger than the slot's payload.
    #[error("deallocating {size} bytes from slot at position {position} holding {payload} bytes")]
    SizeExceedsSlot {
        /// Slot position.
        position: usize,
        /// Size passed to deallocate.
        size: usize,
        /// Payload bytes of the slot.
        payload: usize,
    },

    /// The free list references an allocated slot.
    #[error("allocated slot at position {position} found in free list")]
    AllocatedSlotInFreeList {
        /// Slot position.
        position: usize,
    },

    /// A back span that disagrees with the previous slot.
    #[error("slot at position {position} points back to {found}, previous slot is {expected}")]
    BackSpanMismatch {
        /// Slot position.
        position: usize,
        /// Position of the physically previous slot.
        expected: usize,
        /// Position derived from the back span.
        found: usize,
    },

    /// Spans that do not sum to the block capacity.
    #[error("slot chain reaches {reached}, block capacity is {capacity}")]
    CoverageMismatch {
        /// Position reached by the physical walk.
        reached: usize,
        /// Block capacity in elements.
        capacity: usize,
    },

    /// A free-list back link that disagrees with the walk.
    #[error("free slot at position {position} links back to {found}, expected {expected}")]
    FreeLinkMismatch {
        /// Slot position.
        position: usize,
        /// Expected previous free position.
        expected: usize,
        /// Stored previous free position.
        found: usize,
    },

    /// A free-list position visited twice.
    #[error("free slot at position {position} appears twice in free list")]
    DuplicateFreeSlot {
        /// Slot position.
        position: usize,
    },

    /// Physically free slots and free-list members differ.
    #[error("{physical} free slots in block, {listed} reachable from free list")]
    FreeSetMismatch {
        /// Free slots found by the physical walk.
        physical: usize,
        /// Free slots reachable from the head.
        listed: usize,
    },

    /// The free-list counter disagrees with its contents.
    #[error("free list counts {count} slots, walk found {walked}")]
    FreeCountMismatch {
        /// Stored count.
        count: usize,
        /// Slots visited by the walk.
        walked: usize,
    },

    /// Release of an offset that was never reserved.
    #[error("no reservation at offset {offset}")]
    UnknownReservation {
        /// Byte offset.
        offset: usize,
    },

    /// Release with a size different from the reservation.
    #[error("reservation at offset {offset} is {reserved} bytes, release asked for {requested}")]
    ReservationSizeMismatch {
        /// Byte offset.
        offset: usize,
        /// Reserved length.
        reserved: usize,
        /// Rounded release length.
        requested: usize,
    },

    /// Segments that overlap or leave a gap.
    #[error("segment at offset {offset} does not start at {expected}")]
    SegmentOverlap {
        /// Segment offset.
        offset: usize,
        /// End of the previous segment.
        expected: usize,
    },
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;
