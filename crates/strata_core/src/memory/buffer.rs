//! # Raw Buffer
//!
//! Owned, aligned, zero-initialized storage for block memory and large
//! allocations.

// SAFETY: This module owns every raw allocation of the allocator.
// All pointer arithmetic is bounds-checked against `len` before use.
#![allow(unsafe_code)]
//!
//! Every other module addresses block memory through validated indices:
//!
//! ```text
//! base                                                      base + len * size_of::<T>()
//! |  T[0]  |  T[1]  |  T[2]  |  ...                |  T[len - 1]  |
//! ```
//!
//! Callers write payload bytes through the pointers handed out by
//! [`RawBuffer::ptr_at`], so the buffer never creates references into its
//! memory. Reads and writes go through raw pointers and `T: Pod` guarantees
//! that whatever bytes a caller left behind are a valid `T`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;

use crate::error::{AllocError, AllocResult};

/// An owned, aligned array of `len` plain-old-data records.
pub struct RawBuffer<T: Pod> {
    /// Start of the allocation.
    ptr: NonNull<T>,
    /// Number of records.
    len: usize,
    /// Layout used for the allocation (needed by `dealloc`).
    layout: Layout,
    /// Marker for T.
    _phantom: PhantomData<T>,
}

impl<T: Pod> RawBuffer<T> {
    /// Allocates `len` zeroed records aligned to at least `alignment` bytes.
    ///
    /// Zero-length buffers still allocate one record so every buffer has a
    /// unique, dereferenceable address.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidLayout`] if `alignment` is not a power of two or
    /// the size overflows, [`AllocError::OutOfMemory`] if the system
    /// allocator fails.
    pub fn zeroed(len: usize, alignment: usize) -> AllocResult<Self> {
        let alignment = alignment.max(std::mem::align_of::<T>());
        let size = std::mem::size_of::<T>()
            .checked_mul(len.max(1))
            .ok_or(AllocError::InvalidLayout { size: usize::MAX, alignment })?;
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| AllocError::InvalidLayout { size, alignment })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(AllocError::OutOfMemory { size, alignment })?;

        Ok(Self {
            ptr,
            len,
            layout,
            _phantom: PhantomData,
        })
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if the buffer holds no records.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the size of the records in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    /// Returns the alignment of the allocation.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Returns the address of the first record.
    #[inline]
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Returns a byte pointer to the first record.
    #[inline]
    #[must_use]
    pub const fn base_ptr(&self) -> NonNull<u8> {
        self.ptr.cast::<u8>()
    }

    /// Checks whether `addr` falls inside the records.
    #[inline]
    #[must_use]
    pub fn contains_addr(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr - self.base_addr() < self.byte_len()
    }

    /// Reads the record at `index`, or `None` past the end.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: index < len, the allocation holds len records of T and
        // every bit pattern is a valid T.
        Some(unsafe { self.ptr.as_ptr().add(index).read() })
    }

    /// Writes the record at `index`. Returns `false` past the end.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) -> bool {
        if index >= self.len {
            return false;
        }
        // SAFETY: index < len.
        unsafe { self.ptr.as_ptr().add(index).write(value) };
        true
    }

    /// Returns a byte pointer to the record at `index`.
    ///
    /// `index == len` yields the one-past-the-end pointer.
    #[inline]
    #[must_use]
    pub fn ptr_at(&self, index: usize) -> Option<NonNull<u8>> {
        if index > self.len {
            return None;
        }
        // SAFETY: index <= len stays within (or one past) the allocation,
        // and offsetting a non-null pointer inside it stays non-null.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index).cast::<u8>()) })
    }

    /// Returns the byte offset of `ptr` from the base, if it lies inside.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        self.contains_addr(addr).then(|| addr - self.base_addr())
    }
}

impl<T: Pod> Drop for RawBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: We allocated this memory with this layout.
        unsafe {
            dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout);
        }
    }
}

impl<T: Pod> std::fmt::Debug for RawBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer")
            .field("base", &(self.base_addr() as *const u8))
            .field("len", &self.len)
            .field("alignment", &self.alignment())
            .finish()
    }
}

// SAFETY: RawBuffer owns its allocation exclusively; moving it to another
// thread moves that ownership.
unsafe impl<T: Pod> Send for RawBuffer<T> {}
