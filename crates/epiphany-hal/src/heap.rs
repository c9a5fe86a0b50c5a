//! Allocator for the shared DRAM window
//!
//! Bookkeeping lives on the host; the window itself holds only user data, so
//! a core scribbling over shared memory cannot corrupt the allocator. The
//! heap never grows past its footprint limit, which is the size of the
//! mapped window.

use std::collections::BTreeMap;

use crate::error::{EhalError, Result};

/// Allocation granule and minimum alignment
pub const HEAP_ALIGN: usize = 8;

/// Round `value` up to the nearest multiple of `alignment` (a power of two).
pub(crate) const fn align_up(value: usize, alignment: usize) -> Option<usize> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// First-fit allocator over `[base, base + limit)` of the shared window
#[derive(Debug, Clone)]
pub struct SharedHeap {
    base: u32,
    limit: usize,
    /// Free blocks keyed by offset, never adjacent
    free: BTreeMap<usize, usize>,
    /// Live allocations keyed by offset
    used: BTreeMap<usize, usize>,
}

impl SharedHeap {
    /// Heap over `limit` bytes starting at coprocessor address `base`
    #[must_use]
    pub fn new(base: u32, limit: usize) -> Self {
        let mut free = BTreeMap::new();
        let usable = limit & !(HEAP_ALIGN - 1);
        if usable > 0 {
            free.insert(0, usable);
        }
        tracing::debug!("Shared heap at {base:#010x}, footprint limit {limit:#x}");
        Self {
            base,
            limit,
            free,
            used: BTreeMap::new(),
        }
    }

    /// First byte of the managed range
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Maximum number of bytes the heap may hand out
    #[must_use]
    pub const fn footprint_limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently allocated, including alignment padding
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.used.values().sum()
    }

    /// Bytes still free, possibly fragmented
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.values().sum()
    }

    /// Largest single allocation that would currently succeed
    #[must_use]
    pub fn largest_free(&self) -> usize {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Number of live allocations
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.used.len()
    }

    /// Allocate `size` bytes, 8-byte aligned. Returns the coprocessor address.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::Resource`] if no free block is large enough.
    pub fn alloc(&mut self, size: usize) -> Result<u32> {
        let exhausted = || EhalError::Resource {
            requested: size,
            available: self.largest_free(),
        };
        let want = align_up(size.max(1), HEAP_ALIGN).ok_or_else(exhausted)?;
        let (off, len) = self
            .free
            .iter()
            .find(|&(_, &len)| len >= want)
            .map(|(&off, &len)| (off, len))
            .ok_or_else(exhausted)?;

        self.free.remove(&off);
        if len > want {
            self.free.insert(off + want, len - want);
        }
        self.used.insert(off, want);

        let addr = self.addr_of(off);
        tracing::trace!("heap alloc {size:#x} -> {addr:#010x}");
        Ok(addr)
    }

    /// Release an allocation returned by [`SharedHeap::alloc`].
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::InvalidState`] if `addr` is not a live allocation.
    pub fn free(&mut self, addr: u32) -> Result<()> {
        let off = addr
            .checked_sub(self.base)
            .map(|o| o as usize)
            .filter(|o| self.used.contains_key(o))
            .ok_or_else(|| EhalError::invalid_state(format!("{addr:#010x} is not a live heap block")))?;
        let mut len = self.used.remove(&off).unwrap_or(0);
        let mut start = off;

        // Merge with the following block
        if let Some(next) = self.free.remove(&(off + len)) {
            len += next;
        }
        // and with the preceding one
        if let Some((&prev, &prev_len)) = self.free.range(..off).next_back() {
            if prev + prev_len == off {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
        tracing::trace!("heap free {addr:#010x}");
        Ok(())
    }

    /// True if `addr` is the start of a live allocation
    #[must_use]
    pub fn is_allocated(&self, addr: u32) -> bool {
        addr.checked_sub(self.base)
            .is_some_and(|o| self.used.contains_key(&(o as usize)))
    }

    // Offsets are bounded by the 32-bit window size
    #[allow(clippy::cast_possible_truncation)]
    fn addr_of(&self, off: usize) -> u32 {
        self.base.wrapping_add(off as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x8E00_0000;

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(16, 8), Some(16));
        assert_eq!(align_up(usize::MAX, 8), None);
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut heap = SharedHeap::new(BASE, 0x1000);
        let a = heap.alloc(3).unwrap();
        let b = heap.alloc(17).unwrap();
        let c = heap.alloc(0).unwrap();
        assert_eq!(a, BASE);
        assert_eq!(b, BASE + 8);
        assert_eq!(c, BASE + 32);
        assert_eq!(heap.in_use(), 40);
        assert_eq!(heap.available(), 0x1000 - 40);
        assert!(heap.is_allocated(b));
    }

    #[test]
    fn exhaustion_reports_footprint() {
        let mut heap = SharedHeap::new(BASE, 0x100);
        heap.alloc(0xF0).unwrap();
        match heap.alloc(0x20) {
            Err(EhalError::Resource {
                requested,
                available,
            }) => {
                assert_eq!(requested, 0x20);
                assert_eq!(available, 0x10);
            }
            other => panic!("expected Resource, got {other:?}"),
        }
        assert!(heap.alloc(usize::MAX).is_err());
    }

    #[test]
    fn free_coalesces_neighbours() {
        let mut heap = SharedHeap::new(BASE, 0x100);
        let a = heap.alloc(0x40).unwrap();
        let b = heap.alloc(0x40).unwrap();
        let c = heap.alloc(0x40).unwrap();
        heap.free(a).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.largest_free(), 0x80);
        heap.free(b).unwrap();
        assert_eq!(heap.largest_free(), 0x100);
        assert_eq!(heap.allocations(), 0);
        // The whole window fits again.
        assert_eq!(heap.alloc(0x100).unwrap(), BASE);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut heap = SharedHeap::new(BASE, 0x100);
        let a = heap.alloc(8).unwrap();
        heap.free(a).unwrap();
        assert!(matches!(heap.free(a), Err(EhalError::InvalidState { .. })));
        assert!(heap.free(BASE - 8).is_err());
        assert!(heap.free(BASE + 4).is_err());
    }

    #[test]
    fn first_fit_reuses_holes() {
        let mut heap = SharedHeap::new(BASE, 0x100);
        let a = heap.alloc(0x20).unwrap();
        heap.alloc(0x20).unwrap();
        heap.free(a).unwrap();
        assert_eq!(heap.alloc(0x10).unwrap(), a);
        assert_eq!(heap.alloc(0x10).unwrap(), a + 0x10);
    }
}
