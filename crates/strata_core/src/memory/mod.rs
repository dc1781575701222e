//! # Memory Management
//!
//! Blocks, the two backends that carve them up, and the pools that own them.
//!
//! ## Backends
//!
//! - [`SlotAllocator`]: bookkeeping inside the block (intrusive free list,
//!   split on allocate, merge on free).
//! - [`SegmentBlock`]: bookkeeping in ordered maps beside the block.
//!
//! Both implement [`MemoryBlock`]; a [`BlockPool`] creates its blocks through
//! [`BackendKind::create_block`].

mod block;
mod buffer;
pub mod element;
mod large;
mod pool;
mod segment;
mod slot;

pub use block::{BackendKind, MemoryBlock};
pub use buffer::RawBuffer;
pub use element::{Element, SlotHeader, SlotStatus, ELEMENT_SIZE, MAX_SPAN};
pub use large::{LargeAllocation, LargeAllocations};
pub use pool::BlockPool;
pub use segment::{SegmentAllocator, SegmentBlock};
pub use slot::SlotAllocator;
