//! # Diagnostics
//!
//! Usage snapshots of blocks, pools and allocators.
//!
//! Snapshots are plain data taken under the allocator lock, so they can be
//! inspected, compared or printed after the lock is released.

use std::fmt;

use crate::affinity::Affinity;
use crate::memory::BackendKind;

/// Usage of one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockStats {
    /// Backend managing the block.
    pub backend: BackendKind,
    /// Address of the first byte.
    pub base_addr: usize,
    /// Buffer size in bytes.
    pub memory_size: usize,
    /// Bytes held by live allocations, bookkeeping included.
    pub reserved_size: usize,
    /// Bytes not held by live allocations.
    pub available_size: usize,
    /// Live allocations.
    pub allocations: usize,
    /// Free slots or segments.
    pub free_regions: usize,
    /// Largest single request a free region could serve, in bytes.
    pub largest_free: usize,
}

/// Usage of one pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Affinity served.
    pub affinity: Affinity,
    /// Backend of the pool's blocks.
    pub backend: BackendKind,
    /// Configured size of new blocks.
    pub block_size: usize,
    /// Configured alignment.
    pub alignment: usize,
    /// Per-block usage, ordered by address.
    pub blocks: Vec<BlockStats>,
}

impl PoolStats {
    /// Bytes of all block buffers.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.blocks.iter().map(|b| b.memory_size).sum()
    }

    /// Bytes held by live allocations.
    #[must_use]
    pub fn reserved_size(&self) -> usize {
        self.blocks.iter().map(|b| b.reserved_size).sum()
    }

    /// Bytes still free in existing blocks.
    #[must_use]
    pub fn available_size(&self) -> usize {
        self.blocks.iter().map(|b| b.available_size).sum()
    }

    /// Live allocations.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.blocks.iter().map(|b| b.allocations).sum()
    }
}

/// Usage of an allocator and the allocators nested under it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Default backend.
    pub backend: BackendKind,
    /// Per-pool usage, ordered by affinity.
    pub pools: Vec<PoolStats>,
    /// Live large allocations.
    pub large_allocations: usize,
    /// Bytes of live large allocations.
    pub large_bytes: usize,
    /// Usage of the nested allocator, if any.
    pub nested: Option<Box<AllocatorStats>>,
}

impl AllocatorStats {
    /// Free bytes in pool blocks, nested allocators included.
    #[must_use]
    pub fn total_available_size(&self) -> usize {
        self.pools.iter().map(PoolStats::available_size).sum::<usize>()
            + self.nested.as_ref().map_or(0, |n| n.total_available_size())
    }

    /// Bytes held by live allocations, large allocations and nested
    /// allocators included.
    #[must_use]
    pub fn total_reserved_size(&self) -> usize {
        self.pools.iter().map(PoolStats::reserved_size).sum::<usize>()
            + self.large_bytes
            + self.nested.as_ref().map_or(0, |n| n.total_reserved_size())
    }

    /// Bytes obtained from the system, large allocations and nested
    /// allocators included.
    #[must_use]
    pub fn total_memory_size(&self) -> usize {
        self.pools.iter().map(PoolStats::memory_size).sum::<usize>()
            + self.large_bytes
            + self.nested.as_ref().map_or(0, |n| n.total_memory_size())
    }

    /// Number of blocks across all pools.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.pools.iter().map(|p| p.blocks.len()).sum::<usize>()
            + self.nested.as_ref().map_or(0, |n| n.block_count())
    }

    /// Reserved share of the obtained memory, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        let memory = self.total_memory_size();
        if memory == 0 {
            return 0.0;
        }
        self.total_reserved_size() as f64 / memory as f64 * 100.0
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Allocator ({}): total_available_size = {}, total_reserved_size = {}, total_memory_size = {} ({:.1}% used)",
            self.backend,
            self.total_available_size(),
            self.total_reserved_size(),
            self.total_memory_size(),
            self.utilization()
        )?;
        for pool in &self.pools {
            writeln!(
                f,
                "  pool '{}' ({}, {}): {} blocks, {} allocations, reserved {} / {} bytes",
                pool.name,
                pool.affinity,
                pool.backend,
                pool.blocks.len(),
                pool.allocations(),
                pool.reserved_size(),
                pool.memory_size()
            )?;
        }
        if self.large_allocations > 0 {
            writeln!(
                f,
                "  large allocations: {} ({} bytes)",
                self.large_allocations, self.large_bytes
            )?;
        }
        if let Some(nested) = &self.nested {
            write!(f, "  nested: {nested}")?;
        }
        Ok(())
    }
}
