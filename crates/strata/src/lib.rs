//! # STRATA
//!
//! The process-wide allocator.
//!
//! The instance is created on first use from the environment
//! (`STRATA_ALLOCATOR`, `STRATA_ALLOCATOR_CONFIG`) and lives until
//! [`shutdown`]. Swapping the backend keeps the previous instance as the
//! nested allocator, so pointers issued before the swap can still be freed.
//!
//! ## Example
//!
//! ```rust
//! use strata::Affinity;
//!
//! let ptr = strata::allocate(48, Affinity::NODES).expect("system allocation");
//! assert!(strata::deallocate(ptr, 48));
//! ```

use std::ptr::NonNull;

use parking_lot::{const_rwlock, MappedRwLockReadGuard, RwLock, RwLockReadGuard};

pub use strata_core::{
    Affinity, AllocError, AllocResult, Allocator, AllocatorConfig, AllocatorStats, BackendKind,
    PoolConfig,
};

/// The process-wide allocator. Readers allocate and free; writers replace it.
static INSTANCE: RwLock<Option<Allocator>> = const_rwlock(None);

/// Read access to the process-wide allocator.
pub type InstanceGuard = MappedRwLockReadGuard<'static, Allocator>;

/// Returns the process-wide allocator, creating it from the environment on
/// first use.
///
/// An invalid environment is logged and the builtin configuration is used.
/// Hold the guard only briefly: backend swaps and shutdown wait for it.
#[must_use]
pub fn instance() -> InstanceGuard {
    loop {
        if INSTANCE.read().is_none() {
            let mut slot = INSTANCE.write();
            if slot.is_none() {
                *slot = Some(allocator_from_env());
            }
        }

        // Another thread may shut down between the two locks.
        if let Ok(guard) = RwLockReadGuard::try_map(INSTANCE.read(), Option::as_ref) {
            return guard;
        }
    }
}

fn allocator_from_env() -> Allocator {
    match Allocator::from_env() {
        Ok(allocator) => {
            tracing::info!("Allocator initialized with the {} backend", allocator.backend());
            allocator
        }
        Err(err) => {
            tracing::error!("Invalid allocator environment ({}), using the builtin configuration", err);
            Allocator::default()
        }
    }
}

/// Checks if the process-wide allocator exists.
#[must_use]
pub fn is_initialized() -> bool {
    INSTANCE.read().is_some()
}

/// Allocates `size` bytes for `affinity` from the process-wide allocator.
///
/// Returns `None` only if the system allocator fails.
#[must_use]
pub fn allocate(size: usize, affinity: Affinity) -> Option<NonNull<u8>> {
    instance().allocate(size, affinity)
}

/// Releases `size` bytes at `ptr` to the process-wide allocator.
///
/// Returns `false` if the pointer is not recognized, including after
/// [`shutdown`].
pub fn deallocate(ptr: NonNull<u8>, size: usize) -> bool {
    match INSTANCE.read().as_ref() {
        Some(allocator) => allocator.deallocate(ptr, size),
        None => {
            tracing::warn!("Deallocation of {:p} after allocator shutdown", ptr);
            false
        }
    }
}

/// Installs an allocator built from `config`.
///
/// A running allocator is kept as the nested allocator of the new one.
///
/// # Errors
///
/// [`AllocError::InvalidConfig`] if the configuration is invalid; the
/// running allocator stays in place.
pub fn init(config: AllocatorConfig) -> AllocResult<()> {
    config.validate()?;

    let mut slot = INSTANCE.write();
    let allocator = match slot.take() {
        Some(previous) => Allocator::with_nested(config, previous)?,
        None => Allocator::new(config)?,
    };
    tracing::info!("Allocator initialized with the {} backend", allocator.backend());
    *slot = Some(allocator);
    Ok(())
}

/// Replaces the process-wide allocator with one using `backend` and the
/// current pool settings. The previous allocator becomes its nested
/// allocator.
///
/// # Errors
///
/// Configuration errors from the environment when no allocator exists yet.
pub fn swap_backend(backend: BackendKind) -> AllocResult<()> {
    let mut slot = INSTANCE.write();
    let previous = match slot.take() {
        Some(previous) => previous,
        None => Allocator::from_env()?,
    };

    let config = AllocatorConfig {
        backend,
        ..previous.config()
    };
    if let Err(err) = config.validate() {
        *slot = Some(previous);
        return Err(err);
    }

    tracing::info!("Swapping allocator backend {} -> {}", previous.backend(), backend);
    *slot = Some(Allocator::with_nested(config, previous)?);
    Ok(())
}

/// Tears down the process-wide allocator and returns its final statistics.
///
/// Every block and large allocation is returned to the system: pointers
/// still in use become dangling.
pub fn shutdown() -> Option<AllocatorStats> {
    let allocator = INSTANCE.write().take()?;
    let stats = allocator.stats();
    tracing::info!(
        "Allocator shut down: {} bytes still reserved of {} obtained",
        stats.total_reserved_size(),
        stats.total_memory_size()
    );
    Some(stats)
}
