//! # Allocator
//!
//! The entry point: routes each request to the pool of its affinity, takes
//! requests no pool can serve straight from the system, and hands pointers it
//! does not recognize to an optional nested allocator.
//!
//! ```text
//! allocate(size, affinity)
//!   -> pools[affinity] -> block -> pointer
//!                      -> new block -> pointer
//!   -> large allocation (pool alignment)
//!
//! deallocate(ptr, size)
//!   -> owning block (address lookup per pool)
//!   -> large allocation table
//!   -> nested allocator
//! ```
//!
//! All mutation happens under one mutex per allocator.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::affinity::Affinity;
use crate::config::{AllocatorConfig, PoolConfig};
use crate::diagnostics::{AllocatorStats, PoolStats};
use crate::error::{AllocError, AllocResult, Corruption};
use crate::memory::{BackendKind, BlockPool, LargeAllocations};

/// Affinity-segregated allocator.
///
/// # Thread Safety
///
/// All operations take `&self` and serialize on an internal mutex.
#[derive(Debug)]
pub struct Allocator {
    /// Backend of pools without an override.
    backend: BackendKind,
    /// Mutable state.
    state: Mutex<AllocatorState>,
    /// Fallback for pointers this allocator did not issue.
    nested: Option<Box<Allocator>>,
}

#[derive(Debug)]
struct AllocatorState {
    /// Settings used for lazily created pools.
    config: AllocatorConfig,
    /// Pools by affinity.
    pools: BTreeMap<Affinity, BlockPool>,
    /// Requests served directly by the system.
    large: LargeAllocations,
}

impl AllocatorState {
    fn new(config: AllocatorConfig) -> Self {
        let pools = config
            .pools
            .iter()
            .map(|pool| (pool.affinity, BlockPool::with_valid_config(pool, config.backend)))
            .collect();
        Self {
            config,
            pools,
            large: LargeAllocations::new(),
        }
    }

    /// Returns the pool of `affinity`, creating it with the defaults.
    fn pool_mut(&mut self, affinity: Affinity) -> &mut BlockPool {
        let config = &self.config;
        self.pools.entry(affinity).or_insert_with(|| {
            let pool = config.pool(affinity);
            tracing::debug!(
                "Creating pool '{}' for {} (block size {}, alignment {})",
                pool.display_name(),
                affinity,
                pool.block_size,
                pool.alignment
            );
            BlockPool::with_valid_config(&pool, config.backend)
        })
    }

    /// Stores `pool` as the configured settings of its affinity, so
    /// [`Allocator::config`] reproduces the live pools.
    fn record_pool_config(&mut self, pool: PoolConfig) {
        match self.config.pools.iter_mut().find(|known| known.affinity == pool.affinity) {
            Some(known) => *known = pool,
            None => self.config.pools.push(pool),
        }
    }

    fn stats(&self, backend: BackendKind) -> AllocatorStats {
        AllocatorStats {
            backend,
            pools: self.pools.values().map(BlockPool::stats).collect(),
            large_allocations: self.large.len(),
            large_bytes: self.large.total_bytes(),
            nested: None,
        }
    }
}

impl Allocator {
    /// Creates an allocator. Pools are created empty; memory is obtained on
    /// first use.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: AllocatorConfig) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config, None))
    }

    /// Creates an allocator that forwards unrecognized pointers to `nested`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] if the configuration is invalid.
    pub fn with_nested(config: AllocatorConfig, nested: Allocator) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config, Some(Box::new(nested))))
    }

    /// Creates an allocator configured from the environment.
    ///
    /// # Errors
    ///
    /// See [`AllocatorConfig::from_env`].
    pub fn from_env() -> AllocResult<Self> {
        Self::new(AllocatorConfig::from_env()?)
    }

    fn from_valid_config(config: AllocatorConfig, nested: Option<Box<Allocator>>) -> Self {
        tracing::debug!(
            "Creating {} allocator with {} configured pools{}",
            config.backend,
            config.pools.len(),
            if nested.is_some() { " and a nested allocator" } else { "" }
        );
        Self {
            backend: config.backend,
            state: Mutex::new(AllocatorState::new(config)),
            nested,
        }
    }

    /// Returns the default backend.
    #[inline]
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns the nested allocator.
    #[inline]
    #[must_use]
    pub fn nested(&self) -> Option<&Allocator> {
        self.nested.as_deref()
    }

    /// Returns a copy of the configuration, including every pool setting
    /// changed since creation.
    #[must_use]
    pub fn config(&self) -> AllocatorConfig {
        self.state.lock().config.clone()
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates `size` bytes for `affinity`.
    ///
    /// Returns `None` only if the system allocator fails.
    ///
    /// # Panics
    ///
    /// On heap corruption detected in the affinity's pool.
    pub fn allocate(&self, size: usize, affinity: Affinity) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let pool = state.pool_mut(affinity);
        let alignment = pool.alignment();
        match pool.allocate(size) {
            Ok(Some(ptr)) => {
                tracing::trace!("Allocated {} bytes for {} at {:p}", size, affinity, ptr);
                return Some(ptr);
            }
            Ok(None) => {}
            Err(AllocError::Corruption(corruption)) => fatal(&corruption),
            Err(err) => {
                tracing::warn!("Pool '{}' could not grow: {}", pool.name(), err);
            }
        }

        match state.large.allocate(size, alignment) {
            Ok(ptr) => {
                tracing::debug!(
                    "Large allocation of {} bytes for {} at {:p} ({} live)",
                    size,
                    affinity,
                    ptr,
                    state.large.len()
                );
                Some(ptr)
            }
            Err(err) => {
                tracing::error!("Allocation of {} bytes for {} failed: {}", size, affinity, err);
                None
            }
        }
    }

    /// Releases `size` bytes at `ptr`. `size` must match the request.
    ///
    /// Returns `false` if neither this allocator nor a nested one issued `ptr`.
    ///
    /// # Panics
    ///
    /// On heap corruption (double free, wrong size, overwritten headers).
    pub fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let released = self.try_deallocate(ptr, size);
        if !released {
            tracing::warn!("Deallocation of unrecognized pointer {:p} ({} bytes)", ptr, size);
        }
        released
    }

    fn try_deallocate(&self, ptr: NonNull<u8>, size: usize) -> bool {
        {
            let mut state = self.state.lock();
            for pool in state.pools.values_mut() {
                match pool.deallocate(ptr, size) {
                    Ok(true) => {
                        tracing::trace!("Released {} bytes at {:p} to pool '{}'", size, ptr, pool.name());
                        return true;
                    }
                    Ok(false) => {}
                    Err(corruption) => fatal(&corruption),
                }
            }

            if let Some(allocation) = state.large.deallocate(ptr) {
                tracing::debug!(
                    "Released large allocation of {} bytes at {:p}",
                    allocation.requested(),
                    ptr
                );
                return true;
            }
        }

        self.nested
            .as_ref()
            .is_some_and(|nested| nested.try_deallocate(ptr, size))
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Sets the size of blocks created from now on for `affinity`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] for a zero size.
    pub fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        let mut state = self.state.lock();
        state.pool_mut(affinity).set_block_size(block_size)?;
        let pool = state.config.pool(affinity).with_block_size(block_size);
        state.record_pool_config(pool);
        Ok(())
    }

    /// Sets the alignment of blocks created from now on for `affinity`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] unless `alignment` is a power of two.
    pub fn set_alignment(&self, affinity: Affinity, alignment: usize) -> AllocResult<()> {
        let mut state = self.state.lock();
        state.pool_mut(affinity).set_alignment(alignment)?;
        let pool = state.config.pool(affinity).with_alignment(alignment);
        state.record_pool_config(pool);
        Ok(())
    }

    /// Creates or reconfigures the pool of `config.affinity`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] if the settings are invalid.
    pub fn configure_pool(&self, config: &PoolConfig) -> AllocResult<()> {
        let mut state = self.state.lock();
        let backend = state.config.backend;
        match state.pools.get_mut(&config.affinity) {
            Some(pool) => pool.reconfigure(config, backend)?,
            None => {
                let pool = BlockPool::new(config, backend)?;
                state.pools.insert(config.affinity, pool);
            }
        }
        state.record_pool_config(config.clone());
        Ok(())
    }

    /// Returns empty blocks of every pool, nested allocators included, to the
    /// system.
    ///
    /// # Returns
    ///
    /// The bytes released.
    pub fn reclaim_empty_blocks(&self) -> usize {
        let released: usize = {
            let mut state = self.state.lock();
            state.pools.values_mut().map(BlockPool::reclaim_empty_blocks).sum()
        };
        if released > 0 {
            tracing::debug!("Reclaimed {} bytes of empty blocks", released);
        }
        released + self.nested.as_ref().map_or(0, |nested| nested.reclaim_empty_blocks())
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Usage snapshot, nested allocators included.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let mut stats = self.state.lock().stats(self.backend);
        stats.nested = self.nested.as_ref().map(|nested| Box::new(nested.stats()));
        stats
    }

    /// Usage snapshot of one pool, if it exists.
    #[must_use]
    pub fn pool_stats(&self, affinity: Affinity) -> Option<PoolStats> {
        self.state.lock().pools.get(&affinity).map(BlockPool::stats)
    }

    /// Free bytes in existing blocks.
    #[must_use]
    pub fn total_available_size(&self) -> usize {
        self.stats().total_available_size()
    }

    /// Bytes held by live allocations.
    #[must_use]
    pub fn total_reserved_size(&self) -> usize {
        self.stats().total_reserved_size()
    }

    /// Bytes obtained from the system.
    #[must_use]
    pub fn total_memory_size(&self) -> usize {
        self.stats().total_memory_size()
    }

    /// Returns the number of live large allocations.
    #[must_use]
    pub fn large_allocation_count(&self) -> usize {
        self.state.lock().large.len()
    }

    /// Writes a summary followed by every pool, block and large allocation.
    ///
    /// # Errors
    ///
    /// Propagates writer errors.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.write_report(out)
    }

    fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        {
            let state = self.state.lock();
            write!(out, "{}", state.stats(self.backend))?;
            for pool in state.pools.values() {
                pool.report(out)?;
            }
            for (addr, allocation) in state.large.iter() {
                writeln!(
                    out,
                    "  large allocation {:#x}: {} bytes (alignment {})",
                    addr,
                    allocation.requested(),
                    allocation.alignment()
                )?;
            }
        }

        if let Some(nested) = &self.nested {
            writeln!(out, "Nested allocator:")?;
            nested.write_report(out)?;
        }
        Ok(())
    }

    /// Checks every block, nested allocators included.
    ///
    /// Logs the first problem found.
    #[must_use]
    pub fn validate(&self) -> bool {
        match self.validate_detailed() {
            Ok(()) => true,
            Err(corruption) => {
                tracing::error!("Allocator validation failed: {}", corruption);
                false
            }
        }
    }

    /// Checks every block, nested allocators included.
    ///
    /// # Errors
    ///
    /// The first [`Corruption`] found.
    pub fn validate_detailed(&self) -> Result<(), Corruption> {
        {
            let state = self.state.lock();
            for pool in state.pools.values() {
                pool.validate()?;
            }
        }
        match &self.nested {
            Some(nested) => nested.validate_detailed(),
            None => Ok(()),
        }
    }

    /// Detaches and returns the nested allocator.
    #[must_use]
    pub fn take_nested(&mut self) -> Option<Allocator> {
        self.nested.take().map(|nested| *nested)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::from_valid_config(AllocatorConfig::default(), None)
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.large.is_empty() {
            tracing::warn!(
                "Releasing {} live large allocations ({} bytes) with the allocator",
                state.large.len(),
                state.large.total_bytes()
            );
        }
        let live: usize = state.pools.values().map(|pool| pool.stats().allocations()).sum();
        if live > 0 {
            tracing::debug!("Releasing {} live pool allocations with the allocator", live);
        }
    }
}

/// Reports heap corruption and aborts the operation.
#[cold]
fn fatal(corruption: &Corruption) -> ! {
    tracing::error!("Heap corruption detected: {}", corruption);
    panic!("heap corruption: {corruption}");
}
