//! Bump allocation within one staging ring slot.

use strata_core::align_up;

/// A bounds-checked handle to bytes inside one ring slot.
///
/// Handles carry the generation of the slot they came from, so a handle kept
/// past a slot reset is rejected instead of aliasing newer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingAllocation {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl StagingAllocation {
    /// Ring slot the bytes live in.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Byte offset from the start of the slot.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation is zero-sized.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Linear allocator over a fixed-capacity region.
///
/// Allocation only moves the cursor forward; memory is reclaimed all at once
/// by [`reset`](Self::reset), which also bumps the generation.
#[derive(Debug, Clone)]
pub struct RingAllocator {
    capacity: usize,
    cursor: usize,
    generation: u64,
}

impl RingAllocator {
    /// Create an empty allocator.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cursor: 0,
            generation: 0,
        }
    }

    /// Total bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far, including alignment padding.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes left before the next reset.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Generation counter, incremented on every reset.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserve `size` bytes starting at a multiple of `alignment`.
    ///
    /// Returns the offset, or `None` if the region does not fit.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<usize> {
        let offset = align_up(self.cursor, alignment.max(1));
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        Some(offset)
    }

    /// Reclaim every allocation.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut ring = RingAllocator::new(1024);
        let a = ring.allocate(10, 4).unwrap();
        let b = ring.allocate(3, 16).unwrap();
        let c = ring.allocate(1, 1).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 16);
        assert_eq!(c, 19);
        assert_eq!(ring.used(), 20);
    }

    #[test]
    fn allocation_past_capacity_fails_without_moving() {
        let mut ring = RingAllocator::new(64);
        assert_eq!(ring.allocate(60, 4), Some(0));
        assert_eq!(ring.allocate(8, 4), None);
        assert_eq!(ring.used(), 60);
        assert_eq!(ring.allocate(4, 4), Some(60));
        assert_eq!(ring.remaining(), 0);
    }

    #[test]
    fn padding_counts_against_capacity() {
        let mut ring = RingAllocator::new(32);
        ring.allocate(1, 1).unwrap();
        // Aligned start is 16; 16 + 17 overflows.
        assert_eq!(ring.allocate(17, 16), None);
        assert_eq!(ring.allocate(16, 16), Some(16));
    }

    #[test]
    fn reset_reclaims_and_bumps_generation() {
        let mut ring = RingAllocator::new(16);
        ring.allocate(16, 1).unwrap();
        assert_eq!(ring.generation(), 0);

        ring.reset();
        assert_eq!(ring.generation(), 1);
        assert_eq!(ring.allocate(16, 1), Some(0));
    }

    #[test]
    fn zero_alignment_is_treated_as_one() {
        let mut ring = RingAllocator::new(8);
        assert_eq!(ring.allocate(3, 0), Some(0));
        assert_eq!(ring.allocate(3, 0), Some(3));
    }
}
