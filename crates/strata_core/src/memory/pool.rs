//! # Block Pool
//!
//! The growable set of blocks serving one affinity.
//!
//! Blocks are keyed by base address, so the owner of a pointer is the block
//! with the greatest base not above it. The block that last served a request
//! is cached and tried first.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ptr::NonNull;

use super::block::{BackendKind, MemoryBlock};
use crate::affinity::Affinity;
use crate::config::{validate_alignment, PoolConfig};
use crate::diagnostics::PoolStats;
use crate::error::{AllocError, AllocResult, Corruption};

/// Blocks of one affinity.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. The owning allocator serializes access.
#[derive(Debug)]
pub struct BlockPool {
    /// Name used in reports.
    name: String,
    /// Affinity served.
    affinity: Affinity,
    /// Backend of new blocks.
    backend: BackendKind,
    /// Size of new blocks in bytes.
    block_size: usize,
    /// Payload alignment in bytes.
    alignment: usize,
    /// Blocks by base address.
    blocks: BTreeMap<usize, Box<dyn MemoryBlock>>,
    /// Base of the block that last had space.
    block_with_space: Option<usize>,
}

impl BlockPool {
    /// Creates an empty pool. No memory is obtained until the first request.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool settings
    /// * `default_backend` - Backend used when `config` has no override
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] if the settings are invalid.
    pub fn new(config: &PoolConfig, default_backend: BackendKind) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config, default_backend))
    }

    /// Creates an empty pool from settings that passed [`PoolConfig::validate`].
    pub(crate) fn with_valid_config(config: &PoolConfig, default_backend: BackendKind) -> Self {
        Self {
            name: config.display_name(),
            affinity: config.affinity,
            backend: config.backend.unwrap_or(default_backend),
            block_size: config.block_size,
            alignment: config.alignment,
            blocks: BTreeMap::new(),
            block_with_space: None,
        }
    }

    /// Applies new settings. Existing blocks keep their backend and
    /// alignment and keep serving requests they can satisfy.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] if the settings are invalid.
    pub fn reconfigure(&mut self, config: &PoolConfig, default_backend: BackendKind) -> AllocResult<()> {
        config.validate()?;
        self.name = config.display_name();
        self.backend = config.backend.unwrap_or(default_backend);
        self.block_size = config.block_size;
        self.set_alignment(config.alignment)
    }

    /// Returns the pool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the affinity served.
    #[inline]
    #[must_use]
    pub const fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Returns the backend of new blocks.
    #[inline]
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns the size of new blocks.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the payload alignment.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the number of blocks.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Changes the size of blocks created from now on.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] for a zero size.
    pub fn set_block_size(&mut self, block_size: usize) -> AllocResult<()> {
        if block_size == 0 {
            return Err(AllocError::InvalidConfig(format!("pool '{}': zero block size", self.name)));
        }
        self.block_size = block_size;
        Ok(())
    }

    /// Changes the alignment of blocks created from now on.
    ///
    /// Existing blocks keep their alignment, so the cached block is dropped
    /// and new requests go to new blocks.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] unless `alignment` is a power of two.
    pub fn set_alignment(&mut self, alignment: usize) -> AllocResult<()> {
        validate_alignment(alignment)?;
        if alignment != self.alignment {
            self.alignment = alignment;
            self.block_with_space = None;
        }
        Ok(())
    }

    /// Largest request served from blocks.
    #[inline]
    #[must_use]
    pub fn maximum_allocation_size(&self) -> usize {
        self.backend.maximum_allocation_size(self.alignment)
    }

    /// Allocates `size` bytes, creating a block if no existing one has room.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the request exceeds [`BlockPool::maximum_allocation_size`].
    ///
    /// # Errors
    ///
    /// [`AllocError::Corruption`] from a block, or a block creation failure.
    pub fn allocate(&mut self, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        if size > self.maximum_allocation_size() {
            return Ok(None);
        }

        let alignment = self.alignment;
        let usable = |block: &dyn MemoryBlock| block.alignment() >= alignment;

        if let Some(base) = self.block_with_space {
            if let Some(block) = self.blocks.get_mut(&base) {
                if usable(block.as_ref()) {
                    if let Some(ptr) = block.allocate(size)? {
                        return Ok(Some(ptr));
                    }
                }
            }
        }

        for (&base, block) in self.blocks.iter_mut().rev() {
            if Some(base) == self.block_with_space || !usable(block.as_ref()) {
                continue;
            }
            if let Some(ptr) = block.allocate(size)? {
                self.block_with_space = Some(base);
                return Ok(Some(ptr));
            }
        }

        let block_size = self.backend.block_size_for(size, alignment).max(self.block_size);
        let mut block = self.backend.create_block(block_size, alignment)?;
        tracing::debug!(
            "Pool '{}': new {} block of {} bytes at {:#x} for a {} byte request",
            self.name,
            self.backend,
            block.memory_size(),
            block.base_addr(),
            size
        );

        let ptr = block.allocate(size)?;
        let base = block.base_addr();
        self.blocks.insert(base, block);
        self.block_with_space = Some(base);
        Ok(ptr)
    }

    /// Releases `size` bytes at `ptr` if a block of this pool owns it.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if no block of this pool contains `ptr`.
    ///
    /// # Errors
    ///
    /// [`Corruption`] reported by the owning block.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<bool, Corruption> {
        let addr = ptr.as_ptr() as usize;
        let Some((&base, block)) = self.blocks.range_mut(..=addr).next_back() else {
            return Ok(false);
        };
        if !block.contains(ptr) {
            return Ok(false);
        }

        block.deallocate(ptr, size)?;
        if block.alignment() >= self.alignment {
            self.block_with_space = Some(base);
        }
        Ok(true)
    }

    /// Checks if a block of this pool contains `ptr`.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.blocks
            .range(..=addr)
            .next_back()
            .is_some_and(|(_, block)| block.contains(ptr))
    }

    /// Returns empty blocks to the system.
    ///
    /// # Returns
    ///
    /// The bytes released.
    pub fn reclaim_empty_blocks(&mut self) -> usize {
        let mut released = 0;
        self.blocks.retain(|base, block| {
            if block.is_empty() {
                released += block.memory_size();
                tracing::debug!("Pool '{}': releasing empty block at {:#x}", self.name, base);
                false
            } else {
                true
            }
        });

        if let Some(base) = self.block_with_space {
            if !self.blocks.contains_key(&base) {
                self.block_with_space = None;
            }
        }
        released
    }

    /// Returns the base address of the cached block.
    #[inline]
    #[must_use]
    pub const fn cached_block(&self) -> Option<usize> {
        self.block_with_space
    }

    /// Usage snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            affinity: self.affinity,
            backend: self.backend,
            block_size: self.block_size,
            alignment: self.alignment,
            blocks: self.blocks.values().map(|block| block.stats()).collect(),
        }
    }

    /// Validates every block.
    ///
    /// # Errors
    ///
    /// The first [`Corruption`] found.
    pub fn validate(&self) -> Result<(), Corruption> {
        self.blocks.values().try_for_each(|block| block.validate())
    }

    /// Writes the pool and its blocks.
    ///
    /// # Errors
    ///
    /// Propagates writer errors.
    pub fn report(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "  BlockPool '{}' ({}): backend {}, block size {}, alignment {}, {} blocks",
            self.name,
            self.affinity,
            self.backend,
            self.block_size,
            self.alignment,
            self.blocks.len()
        )?;
        for block in self.blocks.values() {
            block.report(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(backend: BackendKind, block_size: usize) -> BlockPool {
        let config = PoolConfig::new(Affinity::OBJECTS).with_block_size(block_size);
        BlockPool::new(&config, backend).unwrap()
    }

    #[test]
    fn test_lazy_block_creation() {
        for backend in BackendKind::ALL {
            let mut pool = pool(backend, 4096);
            assert_eq!(pool.block_count(), 0);
            let ptr = pool.allocate(64).unwrap().unwrap();
            assert_eq!(pool.block_count(), 1);
            assert!(pool.owns(ptr));
            assert!(pool.deallocate(ptr, 64).unwrap());
        }
    }

    #[test]
    fn test_request_larger_than_block_size_gets_own_block() {
        for backend in BackendKind::ALL {
            let mut pool = pool(backend, 4096);
            let ptr = pool.allocate(10_000).unwrap().unwrap();
            let stats = pool.stats();
            assert_eq!(stats.blocks.len(), 1);
            assert!(stats.blocks[0].memory_size >= 10_000);
            assert!(pool.deallocate(ptr, 10_000).unwrap());
            pool.validate().unwrap();
        }
    }

    #[test]
    fn test_growth_and_owner_lookup() {
        for backend in BackendKind::ALL {
            let mut pool = pool(backend, 1024);
            let ptrs: Vec<_> = (0..64).map(|_| pool.allocate(100).unwrap().unwrap()).collect();
            assert!(pool.block_count() > 1);

            for &ptr in &ptrs {
                assert!(pool.owns(ptr));
            }
            for ptr in ptrs {
                assert!(pool.deallocate(ptr, 100).unwrap());
            }
            pool.validate().unwrap();
            assert_eq!(pool.stats().allocations(), 0);
        }
    }

    #[test]
    fn test_foreign_pointer_not_owned() {
        let mut pool = pool(BackendKind::Slot, 4096);
        let _ = pool.allocate(16).unwrap().unwrap();
        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(!pool.owns(foreign));
        assert!(!pool.deallocate(foreign, 8).unwrap());
    }

    #[test]
    fn test_reclaim_clears_cache() {
        let mut pool = pool(BackendKind::Slot, 4096);
        let ptr = pool.allocate(64).unwrap().unwrap();
        assert!(pool.cached_block().is_some());
        assert_eq!(pool.reclaim_empty_blocks(), 0);

        pool.deallocate(ptr, 64).unwrap();
        assert_eq!(pool.reclaim_empty_blocks(), 4096);
        assert_eq!(pool.block_count(), 0);
        assert!(pool.cached_block().is_none());

        assert!(pool.allocate(64).unwrap().is_some());
    }

    #[test]
    fn test_alignment_change_uses_new_block() {
        let mut pool = pool(BackendKind::Slot, 4096);
        let _ = pool.allocate(8).unwrap().unwrap();
        pool.set_alignment(64).unwrap();
        let ptr = pool.allocate(8).unwrap().unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        assert_eq!(pool.block_count(), 2);
        assert!(pool.set_alignment(48).is_err());
    }

    #[test]
    fn test_oversized_request_declined() {
        let mut pool = pool(BackendKind::Slot, 4096);
        let too_big = pool.maximum_allocation_size() + 1;
        assert!(pool.allocate(too_big).unwrap().is_none());
        assert_eq!(pool.block_count(), 0);
    }
}
