//! # STRATA Core Allocator
//!
//! Affinity-segregated memory allocator for object systems that churn
//! through many small, similarly sized allocations:
//! - One pool of blocks per affinity (objects, data, nodes, physics, ...)
//! - Two interchangeable block backends
//! - Large requests served directly by the system and tracked
//!
//! ## Architecture Rules
//!
//! 1. **No global state** - every operation goes through an explicit [`Allocator`]
//! 2. **Corruption is fatal** - inconsistent bookkeeping panics instead of spreading
//! 3. **All raw memory lives in [`memory::RawBuffer`]** - the only `unsafe` code
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{Affinity, Allocator};
//!
//! let allocator = Allocator::default();
//! let ptr = allocator.allocate(64, Affinity::OBJECTS).expect("system allocation");
//! assert!(allocator.deallocate(ptr, 64));
//! assert!(allocator.validate());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod affinity;
pub mod allocator;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod memory;

pub use affinity::Affinity;
pub use allocator::Allocator;
pub use config::{AllocatorConfig, PoolConfig};
pub use diagnostics::{AllocatorStats, BlockStats, PoolStats};
pub use error::{AllocError, AllocResult, Corruption};
pub use memory::{BackendKind, BlockPool, MemoryBlock, SegmentAllocator, SlotAllocator};
