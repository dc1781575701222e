//! # Slot Allocator
//!
//! Intrusive allocator for one contiguous buffer. All bookkeeping lives inside
//! the buffer: every slot starts with a header element, and free slots reuse
//! their first two payload elements as free-list links.
//!
//! ```text
//!  position 0    1                  19                 29                1024
//! +----------+------------------+------------------+------------------+
//! | sentinel | hdr | payload .. | hdr | prev | next| hdr | payload .. |
//! +----------+------------------+------------------+------------------+
//!              allocated          free               allocated
//! ```
//!
//! ## Invariants
//!
//! 1. Forward spans summed from the first slot reach `capacity` exactly.
//! 2. Each back span equals the forward span of the physically previous slot.
//! 3. No span is zero.
//! 4. The free list reaches exactly the physically free slots, once each.
//!
//! Position 0 is never a slot, so it doubles as the "no link" marker.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::ptr::NonNull;

use super::block::{BackendKind, MemoryBlock};
use super::buffer::RawBuffer;
use super::element::{Element, SlotHeader, SlotStatus, ELEMENT_SIZE, MAX_SPAN, MIN_PAYLOAD_ELEMENTS};
use crate::diagnostics::BlockStats;
use crate::error::{AllocError, AllocResult, Corruption};

/// Smallest span that can host a free slot (header + payload minimum).
const MIN_SLOT_SPAN: usize = 1 + MIN_PAYLOAD_ELEMENTS;

/// Minimum alignment of block buffers.
const MIN_BLOCK_ALIGNMENT: usize = 16;

/// Head and length of a block's free list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FreeList {
    /// Position of the first free slot, 0 when empty.
    head: usize,
    /// Number of free slots.
    count: usize,
}

/// Intrusive free-list allocator over one buffer of [`Element`]s.
///
/// # Thread Safety
///
/// Not thread-safe. Owned by a [`super::BlockPool`], which is serialized by
/// the allocator mutex.
pub struct SlotAllocator {
    /// The managed buffer.
    memory: RawBuffer<Element>,
    /// Payload alignment in bytes.
    alignment: usize,
    /// Payload alignment in elements.
    element_alignment: usize,
    /// End of the slot chain in elements.
    capacity: usize,
    /// Position of the first slot.
    first: usize,
    /// Largest request this block accepts, in bytes.
    maximum_allocation_size: usize,
    /// Free slots.
    free_list: FreeList,
    /// Number of allocated slots.
    allocations: usize,
    /// Elements held by allocated slots, headers included.
    reserved: usize,
}

impl SlotAllocator {
    /// Creates a block of at least `block_size` bytes whose payloads are
    /// aligned to `alignment`.
    ///
    /// The block is covered by free slots of maximal aligned span, so a
    /// block that fits in one span starts as a single free slot.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidLayout`] for a non power-of-two alignment,
    /// [`AllocError::BlockTooLarge`] when positions would not fit in 32 bits,
    /// [`AllocError::OutOfMemory`] if the system allocator fails.
    pub fn new(block_size: usize, alignment: usize) -> AllocResult<Self> {
        let alignment = alignment.max(ELEMENT_SIZE);
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidLayout {
                size: block_size,
                alignment,
            });
        }

        let block_size = align_up(block_size, alignment);
        let elements = block_size / ELEMENT_SIZE;
        if u32::try_from(elements).is_err() {
            return Err(AllocError::BlockTooLarge { size: block_size });
        }

        let memory = RawBuffer::zeroed(elements, alignment.max(MIN_BLOCK_ALIGNMENT))?;
        let element_alignment = alignment / ELEMENT_SIZE;
        let first = first_position(element_alignment);

        let mut block = Self {
            memory,
            alignment,
            element_alignment,
            capacity: elements,
            first,
            maximum_allocation_size: 0,
            free_list: FreeList::default(),
            allocations: 0,
            reserved: 0,
        };
        block.carve_initial_slots();
        block.maximum_allocation_size = Self::maximum_allocation_size_for(alignment)
            .min(block.capacity.saturating_sub(first + 1) * ELEMENT_SIZE);

        Ok(block)
    }

    /// Largest request any slot block with this alignment can serve.
    ///
    /// Bounded by the 15-bit span encoding, not by the block size.
    #[must_use]
    pub fn maximum_allocation_size_for(alignment: usize) -> usize {
        let element_alignment = (alignment / ELEMENT_SIZE).max(1);
        (max_aligned_span(element_alignment) - 1) * ELEMENT_SIZE
    }

    /// Smallest block size whose first slot can hold `size` bytes.
    #[must_use]
    pub fn block_size_for(size: usize, alignment: usize) -> usize {
        let alignment = alignment.max(ELEMENT_SIZE);
        let element_alignment = alignment / ELEMENT_SIZE;
        let needed = size.div_ceil(ELEMENT_SIZE).max(MIN_PAYLOAD_ELEMENTS);
        let elements = first_position(element_alignment) + 1 + needed;
        align_up(elements * ELEMENT_SIZE, alignment)
    }

    /// Lays out the initial chain of free slots.
    fn carve_initial_slots(&mut self) {
        let elements = self.memory.len();
        let max_span = max_aligned_span(self.element_alignment);

        let mut previous = 0;
        let mut position = self.first;
        while elements.saturating_sub(position) >= MIN_SLOT_SPAN {
            let next = (position + max_span).min(elements);
            let back = if previous == 0 { 0 } else { position - previous };

            self.memory
                .set(position, SlotHeader::new(back, next - position, SlotStatus::Free).encode());
            self.memory.set(position + 1, Element::from_position(previous));
            self.memory.set(position + 2, Element::from_position(0));

            if previous == 0 {
                self.free_list.head = position;
            } else {
                self.memory.set(previous + 2, Element::from_position(position));
            }
            self.free_list.count += 1;

            previous = position;
            position = next;
        }

        // A tail too short for a slot is not part of the chain.
        self.capacity = position.max(self.first);
    }

    /// Returns the payload alignment in bytes.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the end of the slot chain in elements.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the position of the first slot.
    #[inline]
    #[must_use]
    pub const fn first_position(&self) -> usize {
        self.first
    }

    /// Returns the number of free slots.
    #[inline]
    #[must_use]
    pub const fn free_slot_count(&self) -> usize {
        self.free_list.count
    }

    /// Returns the number of live allocations.
    #[inline]
    #[must_use]
    pub const fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Collects `(position, span)` of every free slot in free-list order.
    ///
    /// # Errors
    ///
    /// Any [`Corruption`] met while walking the list.
    pub fn free_slots(&self) -> Result<Vec<(usize, usize)>, Corruption> {
        let mut slots = Vec::with_capacity(self.free_list.count);
        let mut position = self.free_list.head;
        while position != 0 {
            if slots.len() >= self.free_list.count {
                return Err(Corruption::FreeCountMismatch {
                    count: self.free_list.count,
                    walked: slots.len() + 1,
                });
            }
            let slot = self.header(position)?;
            slots.push((position, slot.next));
            position = self.next_free(position)?;
        }
        Ok(slots)
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    fn element(&self, position: usize) -> Result<Element, Corruption> {
        if position == 0 || position >= self.capacity {
            return Err(Corruption::PositionOutOfRange {
                position,
                capacity: self.capacity,
            });
        }
        self.memory.get(position).ok_or(Corruption::PositionOutOfRange {
            position,
            capacity: self.capacity,
        })
    }

    fn set_element(&mut self, position: usize, element: Element) -> Result<(), Corruption> {
        if position == 0 || position >= self.capacity || !self.memory.set(position, element) {
            return Err(Corruption::PositionOutOfRange {
                position,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn header(&self, position: usize) -> Result<SlotHeader, Corruption> {
        SlotHeader::decode(self.element(position)?, position)
    }

    fn set_header(&mut self, position: usize, header: SlotHeader) -> Result<(), Corruption> {
        self.set_element(position, header.encode())
    }

    fn previous_free(&self, position: usize) -> Result<usize, Corruption> {
        Ok(self.element(position + 1)?.position())
    }

    fn next_free(&self, position: usize) -> Result<usize, Corruption> {
        Ok(self.element(position + 2)?.position())
    }

    fn set_previous_free(&mut self, position: usize, link: usize) -> Result<(), Corruption> {
        self.set_element(position + 1, Element::from_position(link))
    }

    fn set_next_free(&mut self, position: usize, link: usize) -> Result<(), Corruption> {
        self.set_element(position + 2, Element::from_position(link))
    }

    /// Position of the slot after `position`, or 0 at the end of the chain.
    fn following(&self, position: usize, header: SlotHeader) -> usize {
        let next = position + header.next;
        if next >= self.capacity {
            0
        } else {
            next
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates `size` bytes from the first free slot that fits.
    ///
    /// Returns `Ok(None)` when the request exceeds the block's maximum or no
    /// free slot is large enough; the pool then tries another block.
    ///
    /// # Errors
    ///
    /// [`Corruption`] if the free list is inconsistent.
    pub fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, Corruption> {
        if size > self.maximum_allocation_size {
            return Ok(None);
        }

        let mut visited = 0;
        let mut position = self.free_list.head;
        while position != 0 {
            visited += 1;
            if visited > self.free_list.count {
                return Err(Corruption::FreeCountMismatch {
                    count: self.free_list.count,
                    walked: visited,
                });
            }

            let mut slot = self.header(position)?;
            if !slot.is_free() {
                return Err(Corruption::AllocatedSlotInFreeList { position });
            }
            if slot.next == 0 {
                return Err(Corruption::ZeroSpan { position });
            }

            let previous_free = self.previous_free(position)?;
            let next_free = self.next_free(position)?;

            if size <= slot.payload_bytes() {
                let ea = self.element_alignment;
                let end = position + slot.next;
                let needed = size.div_ceil(ELEMENT_SIZE).max(MIN_PAYLOAD_ELEMENTS);
                let next_aligned_start = ((position + 1 + needed + ea) / ea) * ea;

                if next_aligned_start + MIN_PAYLOAD_ELEMENTS < end {
                    self.split(position, &mut slot, next_aligned_start - 1, previous_free, next_free)?;
                } else {
                    self.unlink(position, previous_free, next_free)?;
                }

                slot.status = SlotStatus::Allocated;
                self.set_header(position, slot)?;
                self.allocations += 1;
                self.reserved += slot.next;

                return self
                    .memory
                    .ptr_at(position + 1)
                    .map(Some)
                    .ok_or(Corruption::PositionOutOfRange {
                        position: position + 1,
                        capacity: self.capacity,
                    });
            }

            position = next_free;
        }

        Ok(None)
    }

    /// Shrinks the free slot at `position` to end at `remainder` and turns
    /// the rest into a free slot that takes over its free-list place.
    fn split(
        &mut self,
        position: usize,
        slot: &mut SlotHeader,
        remainder: usize,
        previous_free: usize,
        next_free: usize,
    ) -> Result<(), Corruption> {
        let end = position + slot.next;
        slot.next = remainder - position;

        let remainder_header = SlotHeader::new(slot.next, end - remainder, SlotStatus::Free);
        self.set_header(remainder, remainder_header)?;
        self.set_previous_free(remainder, previous_free)?;
        self.set_next_free(remainder, next_free)?;

        if previous_free != 0 {
            self.set_next_free(previous_free, remainder)?;
        }
        if next_free != 0 {
            self.set_previous_free(next_free, remainder)?;
        }

        if end < self.capacity {
            let mut following = self.header(end)?;
            following.previous = remainder_header.next;
            self.set_header(end, following)?;
        }

        if self.free_list.head == position {
            self.free_list.head = remainder;
        }
        Ok(())
    }

    /// Removes a fully consumed slot from the free list.
    fn unlink(&mut self, position: usize, previous_free: usize, next_free: usize) -> Result<(), Corruption> {
        if previous_free != 0 {
            self.set_next_free(previous_free, next_free)?;
        }
        if next_free != 0 {
            self.set_previous_free(next_free, previous_free)?;
        }
        if self.free_list.head == position {
            self.free_list.head = next_free;
        }
        self.free_list.count -= 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deallocation
    // ------------------------------------------------------------------

    /// Returns the slot holding `ptr` to the free list, merging it with free
    /// physical neighbours while the merged span stays encodable.
    ///
    /// `ptr` must lie inside this block (see [`MemoryBlock::contains`]).
    ///
    /// # Errors
    ///
    /// [`Corruption`] on a pointer that does not start a payload, a double
    /// free, a zero span, or `size` larger than the slot.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), Corruption> {
        // Slots around the one being freed:
        //   P (previous), C (current), N (next), NN (next's next)
        // and their free-list neighbours:
        //   PPF / PNF (P's previous / next free), NPF / NNF (N's previous / next free)
        let c = self.slot_of(ptr)?;
        let current = self.header(c)?;

        if current.next == 0 {
            return Err(Corruption::ZeroSpan { position: c });
        }
        if current.is_free() {
            return Err(Corruption::DoubleFree { position: c });
        }
        if size > current.payload_bytes() {
            return Err(Corruption::SizeExceedsSlot {
                position: c,
                size,
                payload: current.payload_bytes(),
            });
        }
        if c + current.next > self.capacity {
            return Err(Corruption::PositionOutOfRange {
                position: c + current.next,
                capacity: self.capacity,
            });
        }

        let p = if current.previous == 0 {
            0
        } else {
            c.checked_sub(current.previous)
                .filter(|&p| p >= self.first)
                .ok_or(Corruption::BackSpanMismatch {
                    position: c,
                    expected: self.first,
                    found: c.wrapping_sub(current.previous),
                })?
        };
        let n = self.following(c, current);

        let previous = if p == 0 { None } else { Some(self.header(p)?) };
        let next = if n == 0 { None } else { Some(self.header(n)?) };

        self.allocations -= 1;
        self.reserved -= current.next;

        match (previous.filter(SlotHeader::is_free), next.filter(SlotHeader::is_free)) {
            (Some(prev), Some(nxt)) => {
                if prev.next + current.next + nxt.next <= MAX_SPAN {
                    self.merge_previous_current_next(p, prev, c, current, n, nxt)
                } else if prev.next + current.next <= MAX_SPAN {
                    self.merge_previous_current(p, prev, c, current, n)
                } else if current.next + nxt.next <= MAX_SPAN {
                    self.merge_current_next(c, current, n, nxt)
                } else {
                    self.insert_standalone(c, current)
                }
            }
            (Some(prev), None) => {
                if prev.next + current.next <= MAX_SPAN {
                    self.merge_previous_current(p, prev, c, current, n)
                } else {
                    self.insert_standalone(c, current)
                }
            }
            (None, Some(nxt)) => {
                if current.next + nxt.next <= MAX_SPAN {
                    self.merge_current_next(c, current, n, nxt)
                } else {
                    self.insert_standalone(c, current)
                }
            }
            (None, None) => self.insert_standalone(c, current),
        }
    }

    /// Recovers the slot position from a payload pointer.
    fn slot_of(&self, ptr: NonNull<u8>) -> Result<usize, Corruption> {
        let offset = self
            .memory
            .offset_of(ptr)
            .ok_or(Corruption::MisalignedPointer {
                offset: (ptr.as_ptr() as usize).wrapping_sub(self.memory.base_addr()),
            })?;

        let payload = offset / ELEMENT_SIZE;
        if offset % ELEMENT_SIZE != 0 || payload <= self.first || payload % self.element_alignment != 0 {
            return Err(Corruption::MisalignedPointer { offset });
        }
        Ok(payload - 1)
    }

    /// Merges P, C and N into P, then splices N out of the free list.
    fn merge_previous_current_next(
        &mut self,
        p: usize,
        mut prev: SlotHeader,
        c: usize,
        current: SlotHeader,
        n: usize,
        nxt: SlotHeader,
    ) -> Result<(), Corruption> {
        let ppf = self.previous_free(p)?;
        let pnf = self.next_free(p)?;
        let npf = self.previous_free(n)?;
        let nnf = self.next_free(n)?;
        let nn = self.following(n, nxt);

        prev.next += current.next + nxt.next;
        self.set_header(p, prev)?;
        if nn != 0 {
            self.set_back_span(nn, prev.next)?;
        }

        if pnf == n {
            self.splice_sequential(p, nnf)?;
        } else if ppf == n {
            self.splice_reverse(p, npf)?;
        } else {
            self.splice_disconnected(n, npf, nnf)?;
        }
        self.clear_header(c)?;
        self.clear_header(n)?;

        // N is no longer a separate free slot.
        self.free_list.count -= 1;
        Ok(())
    }

    /// Free-list order `.. P N NNF ..`: P adopts N's forward link.
    ///
    /// Post: `P.next_free == NNF` and `NNF.previous_free == P`.
    fn splice_sequential(&mut self, p: usize, nnf: usize) -> Result<(), Corruption> {
        self.set_next_free(p, nnf)?;
        if nnf != 0 {
            self.set_previous_free(nnf, p)?;
        }
        Ok(())
    }

    /// Free-list order `.. NPF N P ..`: P adopts N's backward link.
    ///
    /// Post: `P.previous_free == NPF`, and `NPF.next_free == P` or P is head.
    fn splice_reverse(&mut self, p: usize, npf: usize) -> Result<(), Corruption> {
        self.set_previous_free(p, npf)?;
        if npf == 0 {
            self.free_list.head = p;
        } else {
            self.set_next_free(npf, p)?;
        }
        Ok(())
    }

    /// P and N not adjacent in the free list: N is unlinked, P stays put.
    ///
    /// Post: `NPF.next_free == NNF`, `NNF.previous_free == NPF`.
    fn splice_disconnected(&mut self, n: usize, npf: usize, nnf: usize) -> Result<(), Corruption> {
        if npf != 0 {
            self.set_next_free(npf, nnf)?;
        }
        if nnf != 0 {
            self.set_previous_free(nnf, npf)?;
        }
        if self.free_list.head == n {
            self.free_list.head = nnf;
        }
        Ok(())
    }

    /// Absorbs C into P. P keeps its free-list place.
    fn merge_previous_current(
        &mut self,
        p: usize,
        mut prev: SlotHeader,
        c: usize,
        current: SlotHeader,
        n: usize,
    ) -> Result<(), Corruption> {
        prev.next += current.next;
        self.set_header(p, prev)?;
        if n != 0 {
            self.set_back_span(n, prev.next)?;
        }
        self.clear_header(c)
    }

    /// Absorbs N into C. C inherits N's free-list links.
    fn merge_current_next(
        &mut self,
        c: usize,
        mut current: SlotHeader,
        n: usize,
        nxt: SlotHeader,
    ) -> Result<(), Corruption> {
        let npf = self.previous_free(n)?;
        let nnf = self.next_free(n)?;
        let nn = self.following(n, nxt);

        current.status = SlotStatus::Free;
        current.next += nxt.next;
        self.set_header(c, current)?;
        if nn != 0 {
            self.set_back_span(nn, current.next)?;
        }

        if npf != 0 {
            self.set_next_free(npf, c)?;
        }
        if nnf != 0 {
            self.set_previous_free(nnf, c)?;
        }
        self.set_previous_free(c, npf)?;
        self.set_next_free(c, nnf)?;

        if self.free_list.head == n {
            self.free_list.head = c;
        }
        self.clear_header(n)
    }

    /// Pushes C at the head of the free list.
    fn insert_standalone(&mut self, c: usize, mut current: SlotHeader) -> Result<(), Corruption> {
        current.status = SlotStatus::Free;
        self.set_header(c, current)?;

        let head = self.free_list.head;
        self.set_previous_free(c, 0)?;
        self.set_next_free(c, head)?;
        if head != 0 {
            self.set_previous_free(head, c)?;
        }

        self.free_list.head = c;
        self.free_list.count += 1;
        Ok(())
    }

    /// Zeroes the header of a slot absorbed by a merge, so a stale pointer
    /// to it fails with [`Corruption::ZeroSpan`].
    fn clear_header(&mut self, position: usize) -> Result<(), Corruption> {
        self.set_element(position, Element::default())
    }

    fn set_back_span(&mut self, position: usize, span: usize) -> Result<(), Corruption> {
        let mut header = self.header(position)?;
        header.previous = span;
        self.set_header(position, header)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Walks the physical chain and the free list and cross-checks them.
    ///
    /// Not used on the allocation path.
    ///
    /// # Errors
    ///
    /// The first [`Corruption`] found.
    pub fn validate(&self) -> Result<(), Corruption> {
        let mut physical_free = BTreeSet::new();

        let mut previous = 0;
        let mut position = self.first;
        while position < self.capacity {
            let slot = self.header(position)?;
            if slot.next == 0 {
                return Err(Corruption::ZeroSpan { position });
            }
            if position + slot.next > self.capacity {
                return Err(Corruption::PositionOutOfRange {
                    position: position + slot.next,
                    capacity: self.capacity,
                });
            }

            let back = if slot.previous == 0 {
                0
            } else {
                position.saturating_sub(slot.previous)
            };
            if back != previous {
                return Err(Corruption::BackSpanMismatch {
                    position,
                    expected: previous,
                    found: back,
                });
            }

            if slot.is_free() {
                physical_free.insert(position);
            }

            previous = position;
            position += slot.next;
        }

        if position != self.capacity {
            return Err(Corruption::CoverageMismatch {
                reached: position,
                capacity: self.capacity,
            });
        }

        let mut listed = BTreeSet::new();
        let mut previous_free = 0;
        let mut free_position = self.free_list.head;
        while free_position != 0 {
            let slot = self.header(free_position)?;
            if !slot.is_free() {
                return Err(Corruption::AllocatedSlotInFreeList {
                    position: free_position,
                });
            }
            if !listed.insert(free_position) {
                return Err(Corruption::DuplicateFreeSlot {
                    position: free_position,
                });
            }

            let back = self.previous_free(free_position)?;
            if back != previous_free {
                return Err(Corruption::FreeLinkMismatch {
                    position: free_position,
                    expected: previous_free,
                    found: back,
                });
            }

            previous_free = free_position;
            free_position = self.next_free(free_position)?;
        }

        if listed.len() != self.free_list.count {
            return Err(Corruption::FreeCountMismatch {
                count: self.free_list.count,
                walked: listed.len(),
            });
        }
        if listed != physical_free {
            return Err(Corruption::FreeSetMismatch {
                physical: physical_free.len(),
                listed: listed.len(),
            });
        }

        Ok(())
    }

    fn largest_free_payload(&self) -> usize {
        self.free_slots()
            .map(|slots| {
                slots
                    .iter()
                    .map(|&(_, span)| span.saturating_sub(1) * ELEMENT_SIZE)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

impl MemoryBlock for SlotAllocator {
    fn backend(&self) -> BackendKind {
        BackendKind::Slot
    }

    fn base_addr(&self) -> usize {
        self.memory.base_addr()
    }

    fn memory_size(&self) -> usize {
        self.memory.byte_len()
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn maximum_allocation_size(&self) -> usize {
        self.maximum_allocation_size
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.memory.contains_addr(ptr.as_ptr() as usize)
    }

    fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, Corruption> {
        SlotAllocator::allocate(self, size)
    }

    fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), Corruption> {
        SlotAllocator::deallocate(self, ptr, size)
    }

    fn is_empty(&self) -> bool {
        self.allocations == 0
    }

    fn stats(&self) -> BlockStats {
        let usable = self.capacity.saturating_sub(self.first) * ELEMENT_SIZE;
        let reserved = self.reserved * ELEMENT_SIZE;
        BlockStats {
            backend: BackendKind::Slot,
            base_addr: self.memory.base_addr(),
            memory_size: self.memory.byte_len(),
            reserved_size: reserved,
            available_size: usable - reserved,
            allocations: self.allocations,
            free_regions: self.free_list.count,
            largest_free: self.largest_free_payload(),
        }
    }

    fn validate(&self) -> Result<(), Corruption> {
        SlotAllocator::validate(self)
    }

    fn report(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "    SlotAllocator {:#x}: {} bytes, alignment {}, capacity {} elements, max allocation {}",
            self.memory.base_addr(),
            self.memory.byte_len(),
            self.alignment,
            self.capacity,
            self.maximum_allocation_size
        )?;

        let mut position = self.first;
        while position < self.capacity {
            let Ok(slot) = self.header(position) else {
                writeln!(out, "      [{position}] unreadable header")?;
                break;
            };
            match slot.status {
                SlotStatus::Free => writeln!(
                    out,
                    "      [{position}] {{ {}, {}, free }} links {} <-> {}",
                    slot.previous,
                    slot.next,
                    self.previous_free(position).unwrap_or(0),
                    self.next_free(position).unwrap_or(0)
                )?,
                SlotStatus::Allocated => {
                    writeln!(out, "      [{position}] {{ {}, {}, allocated }}", slot.previous, slot.next)?;
                }
            }
            if slot.next == 0 {
                break;
            }
            position += slot.next;
        }

        writeln!(
            out,
            "      free list: count = {}, head = {}",
            self.free_list.count, self.free_list.head
        )
    }
}

impl std::fmt::Debug for SlotAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotAllocator")
            .field("memory", &self.memory)
            .field("capacity", &self.capacity)
            .field("free_list", &self.free_list)
            .field("allocations", &self.allocations)
            .finish()
    }
}

/// Position of the first slot: its payload lands on an aligned element and
/// position 0 stays free for the sentinel.
#[inline]
fn first_position(element_alignment: usize) -> usize {
    element_alignment.max(2) - 1
}

/// Largest span that keeps the following slot's payload aligned.
#[inline]
fn max_aligned_span(element_alignment: usize) -> usize {
    element_alignment * (MAX_SPAN / element_alignment)
}

#[inline]
fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}
