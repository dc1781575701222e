//! # Slot Elements
//!
//! The 4-byte record a slot block is made of, and the packed slot header.
//!
//! ```text
//!  31 30 29                 15 14                  0
//! +-----+---------------------+---------------------+
//! | st  |   next (15 bits)    |  previous (15 bits) |   header element
//! +-----+---------------------+---------------------+
//! |            previous free position (32)          |   free slots only
//! +-------------------------------------------------+
//! |              next free position (32)            |   free slots only
//! +-------------------------------------------------+
//! ```

use bytemuck::{Pod, Zeroable};

use crate::error::Corruption;

/// Size of one element in bytes.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<Element>();

/// Largest span a header can encode, in elements.
pub const MAX_SPAN: usize = (1 << SPAN_BITS) - 1;

/// Smallest payload of any slot, in elements. A freed slot must be able to
/// host its two free-list links.
pub const MIN_PAYLOAD_ELEMENTS: usize = 3;

const SPAN_BITS: u32 = 15;
const SPAN_MASK: u32 = (1 << SPAN_BITS) - 1;
const STATUS_SHIFT: u32 = 2 * SPAN_BITS;

const STATUS_ALLOCATED: u32 = 0;
const STATUS_FREE: u32 = 1;

/// One 4-byte record of a slot block: either a header or a position.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Element(u32);

impl Element {
    /// An element holding a block-relative position.
    ///
    /// Positions are bounded by the block capacity, which is checked to fit
    /// in 32 bits when the block is created.
    #[inline]
    #[must_use]
    pub const fn from_position(position: usize) -> Self {
        Self(position as u32)
    }

    /// The element read as a block-relative position.
    #[inline]
    #[must_use]
    pub const fn position(self) -> usize {
        self.0 as usize
    }

    /// The raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Occupancy of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// Payload belongs to a caller.
    Allocated,
    /// Slot is linked into the free list.
    Free,
}

/// Decoded slot header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotHeader {
    /// Span back to the physically previous slot (0 for the first slot).
    pub previous: usize,
    /// Span of this slot, i.e. the distance to the next slot.
    pub next: usize,
    /// Occupancy.
    pub status: SlotStatus,
}

impl SlotHeader {
    /// Creates a header. Spans must not exceed [`MAX_SPAN`].
    #[inline]
    #[must_use]
    pub const fn new(previous: usize, next: usize, status: SlotStatus) -> Self {
        Self {
            previous,
            next,
            status,
        }
    }

    /// Checks if the slot is free.
    #[inline]
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }

    /// Payload capacity in bytes: every element of the span but the header.
    #[inline]
    #[must_use]
    pub const fn payload_bytes(&self) -> usize {
        self.next.saturating_sub(1) * ELEMENT_SIZE
    }

    /// Decodes the header stored at `position`.
    ///
    /// # Errors
    ///
    /// [`Corruption::InvalidStatus`] if the status bits are neither Free
    /// nor Allocated.
    pub fn decode(element: Element, position: usize) -> Result<Self, Corruption> {
        let bits = element.bits();
        let status = match bits >> STATUS_SHIFT {
            STATUS_ALLOCATED => SlotStatus::Allocated,
            STATUS_FREE => SlotStatus::Free,
            status => return Err(Corruption::InvalidStatus { position, status }),
        };
        Ok(Self {
            previous: (bits & SPAN_MASK) as usize,
            next: ((bits >> SPAN_BITS) & SPAN_MASK) as usize,
            status,
        })
    }

    /// Encodes the header into an element.
    #[inline]
    #[must_use]
    pub fn encode(self) -> Element {
        debug_assert!(self.previous <= MAX_SPAN && self.next <= MAX_SPAN);
        let status = match self.status {
            SlotStatus::Allocated => STATUS_ALLOCATED,
            SlotStatus::Free => STATUS_FREE,
        };
        Element(
            (self.previous as u32 & SPAN_MASK)
                | ((self.next as u32 & SPAN_MASK) << SPAN_BITS)
                | (status << STATUS_SHIFT),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding() {
        let header = SlotHeader::new(MAX_SPAN, 17, SlotStatus::Free);
        let decoded = SlotHeader::decode(header.encode(), 1).unwrap();
        assert_eq!(decoded, header);

        let allocated = SlotHeader::new(0, MAX_SPAN, SlotStatus::Allocated);
        assert_eq!(SlotHeader::decode(allocated.encode(), 1).unwrap(), allocated);
    }

    #[test]
    fn test_zeroed_element_is_allocated_zero_span() {
        let header = SlotHeader::decode(Element::default(), 4).unwrap();
        assert_eq!(header.next, 0);
        assert_eq!(header.status, SlotStatus::Allocated);
    }

    #[test]
    fn test_invalid_status_rejected() {
        let element = Element(3 << STATUS_SHIFT);
        assert_eq!(
            SlotHeader::decode(element, 9),
            Err(Corruption::InvalidStatus { position: 9, status: 3 })
        );
    }

    #[test]
    fn test_payload_bytes() {
        assert_eq!(SlotHeader::new(0, 4, SlotStatus::Free).payload_bytes(), 12);
        assert_eq!(SlotHeader::new(0, 0, SlotStatus::Free).payload_bytes(), 0);
    }
}
