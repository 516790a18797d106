use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};

use crate::config::check_alignment;
use crate::error::{Error, Result};
use crate::memory::runtime::{Blob, Runtime};

/// Planner for a single flat address space.
///
/// `alloc` and `free` only move offsets around; no real memory exists until
/// `get_ptr` asks the runtime for one backing allocation. From that point on
/// the layout is frozen.
#[derive(Debug)]
pub struct Allocator {
    runtime: Arc<dyn Runtime>,
    capacity: usize,
    alignment: usize,
    /// Bytes currently allocated
    used: usize,
    /// Historical maximum of `used`
    peak: usize,
    /// Highest end address ever handed out
    high_water: usize,
    /// Backing memory, set by the first `get_ptr`
    ptr: Option<Blob>,
    /// start address -> block length
    allocated: BTreeMap<usize, usize>,
    /// start address -> block length
    available: BTreeMap<usize, usize>,
}

impl Allocator {
    /// Create an allocator over `[0, capacity)`
    pub fn new(runtime: Arc<dyn Runtime>, capacity: usize, alignment: usize) -> Result<Self> {
        check_alignment(alignment)?;

        let mut available = BTreeMap::new();
        if capacity > 0 {
            available.insert(0, capacity);
        }

        Ok(Self {
            runtime,
            capacity,
            alignment,
            used: 0,
            peak: 0,
            high_water: 0,
            ptr: None,
            allocated: BTreeMap::new(),
            available,
        })
    }

    /// Round `size` up to the alignment quantum.
    ///
    /// Empty requests still occupy one quantum so that every allocation has
    /// a distinct start address.
    pub fn aligned_size(&self, size: usize) -> usize {
        let size = std::cmp::max(1, size);
        size.div_ceil(self.alignment).saturating_mul(self.alignment)
    }

    /// Reserve `size` bytes and return the offset of the block (first fit)
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        if self.ptr.is_some() {
            return Err(Error::AllocatorFrozen);
        }
        let size = self.aligned_size(size);

        let (offset, length) = self
            .available
            .iter()
            .find(|(_, &length)| length >= size)
            .map(|(&offset, &length)| (offset, length))
            .ok_or(Error::CapacityExhausted {
                requested: size,
                capacity: self.capacity,
                used: self.used,
            })?;

        self.available.remove(&offset);
        if length > size {
            self.available.insert(offset + size, length - size);
        }
        self.allocated.insert(offset, size);

        self.used += size;
        self.peak = std::cmp::max(self.peak, self.used);
        self.high_water = std::cmp::max(self.high_water, offset + size);

        Ok(offset)
    }

    /// Release the block starting at `addr`.
    ///
    /// The whole recorded block is released even when `size` is smaller than
    /// what was allocated there.
    pub fn free(&mut self, addr: usize, size: usize) -> Result<()> {
        if self.ptr.is_some() {
            return Err(Error::AllocatorFrozen);
        }
        let size = self.aligned_size(size);

        let recorded = *self.allocated.get(&addr).ok_or_else(|| {
            Error::InvalidFree(format!("offset {} was not allocated", addr))
        })?;

        if recorded < size {
            return Err(Error::InvalidFree(format!(
                "offset {} holds {} bytes, cannot free {}",
                addr, recorded, size
            )));
        }
        if recorded > size {
            warn!(
                "offset {} holds {} bytes but only {} were freed, releasing the whole block",
                addr, recorded, size
            );
        }

        self.allocated.remove(&addr);
        self.used -= recorded;

        let mut start = addr;
        let mut length = recorded;

        // Merge with the following free block
        if let Some(next) = self.available.remove(&(addr + recorded)) {
            length += next;
        }

        // Merge with the preceding free block
        let preceding = self
            .available
            .range(..addr)
            .next_back()
            .map(|(&offset, &len)| (offset, len));
        if let Some((prev_offset, prev_length)) = preceding {
            if prev_offset + prev_length == addr {
                self.available.remove(&prev_offset);
                start = prev_offset;
                length += prev_length;
            }
        }

        self.available.insert(start, length);
        Ok(())
    }

    /// Materialize the backing memory, once.
    ///
    /// The allocation covers every offset handed out so far, which is `peak`
    /// bytes whenever no block was freed before a later allocation.
    pub fn get_ptr(&mut self) -> Result<Blob> {
        if let Some(blob) = self.ptr {
            return Ok(blob);
        }

        let bytes = std::cmp::max(self.peak, self.high_water);
        let blob = Blob::new(self.runtime.alloc(bytes)?);
        info!(
            "Allocator materialized {} bytes at {:p} on {}",
            bytes,
            blob.as_ptr(),
            self.runtime.name()
        );
        self.ptr = Some(blob);
        Ok(blob)
    }

    /// Log the current usage
    pub fn info(&self) {
        info!("Used memory: {}, peak memory: {}", self.used, self.peak);
    }

    /// Bytes currently allocated
    pub fn used(&self) -> usize {
        self.used
    }

    /// Largest value `used` has reached
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Size of the address space
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alignment quantum
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Whether backing memory exists (and the layout is frozen)
    pub fn is_materialized(&self) -> bool {
        self.ptr.is_some()
    }

    /// Allocated blocks as `(offset, length)` in address order
    pub fn allocated_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.allocated.iter().map(|(&offset, &length)| (offset, length))
    }

    /// Free blocks as `(offset, length)` in address order
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.available.iter().map(|(&offset, &length)| (offset, length))
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        if let Some(blob) = self.ptr.take() {
            self.runtime.dealloc(blob.as_non_null());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::runtime::CpuRuntime;

    fn allocator(capacity: usize) -> Allocator {
        Allocator::new(Arc::new(CpuRuntime::new()), capacity, 8).unwrap()
    }

    #[test]
    fn test_alloc_aligns_offsets() {
        let mut allocator = allocator(1024);
        assert_eq!(allocator.alloc(10).unwrap(), 0);
        assert_eq!(allocator.alloc(20).unwrap(), 16);
        assert_eq!(allocator.used(), 40);
        assert_eq!(allocator.peak(), 40);
        assert_eq!(allocator.free_blocks().collect::<Vec<_>>(), vec![(40, 984)]);
    }

    #[test]
    fn test_free_coalesces_in_either_order() {
        for order in [[0usize, 1], [1, 0]] {
            let mut allocator = allocator(1024);
            let blocks = [(allocator.alloc(10).unwrap(), 10), (allocator.alloc(20).unwrap(), 20)];
            for i in order {
                allocator.free(blocks[i].0, blocks[i].1).unwrap();
            }
            assert_eq!(allocator.free_blocks().collect::<Vec<_>>(), vec![(0, 1024)]);
            assert_eq!(allocator.used(), 0);
            assert_eq!(allocator.peak(), 40);
        }
    }

    #[test]
    fn test_free_merges_both_neighbours_at_once() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(8).unwrap();
        let b = allocator.alloc(8).unwrap();
        let c = allocator.alloc(8).unwrap();
        allocator.free(a, 8).unwrap();
        allocator.free(c, 8).unwrap();
        assert_eq!(
            allocator.free_blocks().collect::<Vec<_>>(),
            vec![(0, 8), (16, 48)]
        );
        allocator.free(b, 8).unwrap();
        assert_eq!(allocator.free_blocks().collect::<Vec<_>>(), vec![(0, 64)]);
    }

    #[test]
    fn test_first_fit_reuses_hole() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(16).unwrap();
        allocator.alloc(8).unwrap();
        allocator.free(a, 16).unwrap();
        assert_eq!(allocator.alloc(8).unwrap(), 0);
        assert_eq!(allocator.alloc(8).unwrap(), 8);
        assert_eq!(allocator.alloc(8).unwrap(), 24);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut allocator = allocator(32);
        allocator.alloc(24).unwrap();
        let err = allocator.alloc(16).unwrap_err();
        assert!(err.is_capacity_exhaustion());
    }

    #[test]
    fn test_zero_capacity() {
        let mut allocator = allocator(0);
        assert_eq!(allocator.free_blocks().count(), 0);
        assert!(allocator.alloc(1).unwrap_err().is_capacity_exhaustion());
    }

    #[test]
    fn test_double_free_and_unknown_offset() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(8).unwrap();
        allocator.free(a, 8).unwrap();
        assert!(matches!(allocator.free(a, 8), Err(Error::InvalidFree(_))));
        assert!(matches!(allocator.free(3, 8), Err(Error::InvalidFree(_))));
    }

    #[test]
    fn test_free_larger_than_recorded_fails() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(8).unwrap();
        assert!(matches!(allocator.free(a, 16), Err(Error::InvalidFree(_))));
        assert_eq!(allocator.used(), 8);
    }

    #[test]
    fn test_partial_free_releases_whole_block() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(32).unwrap();
        allocator.free(a, 8).unwrap();
        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.free_blocks().collect::<Vec<_>>(), vec![(0, 64)]);
    }

    #[test]
    fn test_zero_sized_requests_get_distinct_offsets() {
        let mut allocator = allocator(64);
        let a = allocator.alloc(0).unwrap();
        let b = allocator.alloc(0).unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.used(), 16);
    }

    #[test]
    fn test_get_ptr_is_idempotent_and_freezes() {
        let runtime = Arc::new(CpuRuntime::new());
        let mut allocator = Allocator::new(runtime.clone(), 1024, 8).unwrap();
        let a = allocator.alloc(100).unwrap();

        let first = allocator.get_ptr().unwrap();
        let second = allocator.get_ptr().unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.allocated_memory(), 104);

        assert!(matches!(allocator.alloc(8), Err(Error::AllocatorFrozen)));
        assert!(matches!(allocator.free(a, 100), Err(Error::AllocatorFrozen)));

        drop(allocator);
        assert_eq!(runtime.allocated_memory(), 0);
    }

    #[test]
    fn test_backing_memory_covers_fragmented_layout() {
        let runtime = Arc::new(CpuRuntime::new());
        let mut allocator = Allocator::new(runtime.clone(), 1024, 8).unwrap();
        let a = allocator.alloc(8).unwrap();
        allocator.alloc(8).unwrap();
        allocator.free(a, 8).unwrap();
        assert_eq!(allocator.alloc(16).unwrap(), 16);
        assert_eq!(allocator.peak(), 24);

        allocator.get_ptr().unwrap();
        assert_eq!(runtime.allocated_memory(), 32);
    }

    #[test]
    fn test_bad_alignment_rejected() {
        for alignment in [0, 4, 12] {
            let result = Allocator::new(Arc::new(CpuRuntime::new()), 64, alignment);
            assert!(matches!(result, Err(Error::InvalidConfig(_))));
        }
    }
}
