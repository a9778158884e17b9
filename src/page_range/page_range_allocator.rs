//! Coalescing page-range allocator
//!
//! Tracks free memory as an address-ordered set of page-granular extents.
//! Allocation is first-fit in address order; every free probes both
//! neighbours and merges on adjacency, so no two free extents ever touch.

use crate::{AllocError, AllocResult, PageSource};

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::extent_set::{Extent, ExtentSet};
use super::stats::PageRangeStats;

#[cfg(feature = "tracking")]
use super::stats::MemoryStatsReporter;

/// Page-range allocator over one or more registered regions
pub struct PageRangeAllocator<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    free: ExtentSet,
    /// Registered capacity; only registration and donation change it
    total_bytes: usize,
    free_bytes: usize,
}

impl<const PAGE_SIZE: usize> PageRangeAllocator<PAGE_SIZE> {
    pub const fn new() -> Self {
        assert!(PAGE_SIZE.is_power_of_two());
        Self {
            free: ExtentSet::new(),
            total_bytes: 0,
            free_bytes: 0,
        }
    }

    /// Add a free memory region to the allocator.
    ///
    /// Both `start` and `bytes` must be page-aligned. The region may touch
    /// existing free extents, in which case it is merged with them, but must
    /// not overlap them.
    pub fn register_region(&mut self, start: usize, bytes: usize) -> AllocResult {
        if !crate::is_aligned(start, PAGE_SIZE) || !crate::is_aligned(bytes, PAGE_SIZE) {
            warn!(
                "page range allocator: unaligned region [{:#x}, +{:#x}), skipping",
                start, bytes
            );
            return Err(AllocError::InvalidParam);
        }
        if bytes == 0 {
            return Ok(());
        }
        if start.checked_add(bytes).is_none() {
            return Err(AllocError::InvalidParam);
        }
        if self.free.overlaps(start, bytes) {
            error!(
                "page range allocator: region [{:#x}, {:#x}) overlaps free memory",
                start,
                start + bytes
            );
            return Err(AllocError::MemoryOverlap);
        }

        self.free.insert_merged(Extent::new(start, bytes));
        self.total_bytes += bytes;
        self.free_bytes += bytes;
        debug!(
            "page range allocator: registered [{:#x}, {:#x}), total {} KB",
            start,
            start + bytes,
            self.total_bytes / 1024
        );
        Ok(())
    }

    /// Register an early-boot range whose bounds need not be page-aligned.
    ///
    /// The range is trimmed inward to whole pages; a range shorter than one
    /// page after trimming is dropped.
    pub fn free_initial_memory_range(&mut self, start: usize, bytes: usize) -> AllocResult {
        let end = start.checked_add(bytes).ok_or(AllocError::InvalidParam)?;
        let aligned_end = crate::align_down(end, PAGE_SIZE);
        // A start inside the topmost page rounds past the end of the address space.
        let aligned_start = start
            .checked_add(PAGE_SIZE - 1)
            .map_or(aligned_end, |s| s & !(PAGE_SIZE - 1));
        if aligned_end <= aligned_start {
            debug!(
                "page range allocator: initial range [{:#x}, {:#x}) holds no whole page",
                start, end
            );
            return Ok(());
        }
        self.register_region(aligned_start, aligned_end - aligned_start)
    }

    /// Allocate a contiguous range of `bytes`, rounded up to whole pages.
    pub fn alloc_page_range(&mut self, bytes: usize) -> AllocResult<usize> {
        if bytes == 0 {
            return Err(AllocError::InvalidParam);
        }
        let size = bytes
            .checked_add(PAGE_SIZE - 1)
            .ok_or(AllocError::NoMemory)?
            & !(PAGE_SIZE - 1);

        let Some(extent) = self.free.first_fit(size) else {
            debug!(
                "page range allocator: allocation failure: {} bytes, {} KB free",
                size,
                self.free_bytes / 1024
            );
            self.print_alloc_failure_stats(size);
            return Err(AllocError::NoMemory);
        };

        self.free.remove(extent.start);
        if extent.size > size {
            // The remainder cannot touch a neighbour: the original extent did not.
            self.free
                .insert_raw(Extent::new(extent.start + size, extent.size - size));
        }
        self.free_bytes -= size;
        Ok(extent.start)
    }

    /// Return a range obtained from [`Self::alloc_page_range`].
    pub fn free_page_range(&mut self, addr: usize, bytes: usize) {
        if bytes == 0 {
            return;
        }
        if !crate::is_aligned(addr, PAGE_SIZE) {
            error!(
                "page range allocator: free of unaligned address {:#x} ignored",
                addr
            );
            return;
        }
        let Some(size) = bytes
            .checked_add(PAGE_SIZE - 1)
            .map(|size| size & !(PAGE_SIZE - 1))
        else {
            error!(
                "page range allocator: free of {} bytes at {:#x} ignored",
                bytes, addr
            );
            return;
        };
        if self.free.overlaps(addr, size) {
            error!(
                "page range allocator: double free of [{:#x}, {:#x}) ignored",
                addr,
                addr + size
            );
            return;
        }

        self.free.insert_merged(Extent::new(addr, size));
        self.free_bytes += size;
    }

    pub fn alloc_page(&mut self) -> AllocResult<usize> {
        self.alloc_page_range(PAGE_SIZE)
    }

    pub fn free_page(&mut self, addr: usize) {
        self.free_page_range(addr, PAGE_SIZE);
    }

    /// Allocate the specific range `[start, start + bytes)`.
    ///
    /// Used to reserve memory that is already in use by someone else, e.g.
    /// structures placed by the bootloader inside a registered region.
    pub fn alloc_range_at(&mut self, start: usize, bytes: usize) -> AllocResult<usize> {
        if bytes == 0 || !crate::is_aligned(start, PAGE_SIZE) {
            return Err(AllocError::InvalidParam);
        }
        let size = bytes
            .checked_add(PAGE_SIZE - 1)
            .ok_or(AllocError::NoMemory)?
            & !(PAGE_SIZE - 1);
        let end = start.checked_add(size).ok_or(AllocError::NoMemory)?;

        let extent = match self.free.containing(start) {
            Some(extent) if extent.contains_range(start, size) => extent,
            _ => {
                debug!(
                    "page range allocator: [{:#x}, {:#x}) is not entirely free",
                    start, end
                );
                return Err(AllocError::NoMemory);
            }
        };

        self.free.remove(extent.start);
        if start > extent.start {
            self.free
                .insert_raw(Extent::new(extent.start, start - extent.start));
        }
        if extent.end() > end {
            self.free.insert_raw(Extent::new(end, extent.end() - end));
        }
        self.free_bytes -= size;
        Ok(start)
    }

    /// Move a range of `bytes` (rounded up to pages) into another allocator.
    ///
    /// The capacity moves along with the range, so `total_bytes` of both
    /// instances is updated. Returns the start of the donated range.
    pub fn donate_range(&mut self, bytes: usize, dest: &mut Self) -> AllocResult<usize> {
        let addr = self.alloc_page_range(bytes)?;
        let size = crate::align_up(bytes, PAGE_SIZE);

        if let Err(e) = dest.register_region(addr, size) {
            warn!(
                "page range allocator: donation of [{:#x}, {:#x}) rejected: {:?}",
                addr,
                addr + size,
                e
            );
            self.free_page_range(addr, size);
            return Err(e);
        }
        self.total_bytes -= size;
        Ok(addr)
    }

    /// Total memory ever registered (capacity, not availability)
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    pub fn extent_count(&self) -> usize {
        self.free.len()
    }

    pub fn largest_extent(&self) -> usize {
        self.free.iter().map(|extent| extent.size).max().unwrap_or(0)
    }

    /// Free extents in ascending address order
    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.free.iter()
    }

    pub fn stats(&self) -> PageRangeStats {
        PageRangeStats {
            total_bytes: self.total_bytes,
            free_bytes: self.free_bytes,
            extent_count: self.free.len(),
            largest_extent: self.largest_extent(),
        }
    }

    /// Print detailed statistics when allocation fails.
    #[cfg(feature = "tracking")]
    fn print_alloc_failure_stats(&self, request_bytes: usize) {
        MemoryStatsReporter::print_alloc_failure_stats(
            PAGE_SIZE,
            &self.stats(),
            self.free.iter(),
            request_bytes,
        );
    }

    #[cfg(not(feature = "tracking"))]
    fn print_alloc_failure_stats(&self, _request_bytes: usize) {
        // No-op when tracking is disabled
    }
}

impl<const PAGE_SIZE: usize> Default for PageRangeAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> PageSource for PageRangeAllocator<PAGE_SIZE> {
    fn alloc_page(&mut self) -> AllocResult<usize> {
        PageRangeAllocator::alloc_page(self)
    }

    fn free_page(&mut self, addr: usize) {
        PageRangeAllocator::free_page(self, addr)
    }

    fn alloc_page_range(&mut self, bytes: usize) -> AllocResult<usize> {
        PageRangeAllocator::alloc_page_range(self, bytes)
    }

    fn free_page_range(&mut self, addr: usize, bytes: usize) {
        PageRangeAllocator::free_page_range(self, addr, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const TEST_PAGE_SIZE: usize = 0x1000;
    const REGION_BASE: usize = 0x10_0000;

    fn allocator_with_pages(pages: usize) -> PageRangeAllocator<TEST_PAGE_SIZE> {
        let mut allocator = PageRangeAllocator::<TEST_PAGE_SIZE>::new();
        allocator
            .register_region(REGION_BASE, pages * TEST_PAGE_SIZE)
            .unwrap();
        allocator
    }

    #[test]
    fn test_register_rejects_unaligned() {
        let mut allocator = PageRangeAllocator::<TEST_PAGE_SIZE>::new();
        assert_eq!(
            allocator.register_region(REGION_BASE + 1, TEST_PAGE_SIZE),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(
            allocator.register_region(REGION_BASE, TEST_PAGE_SIZE + 8),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(allocator.total_bytes(), 0);
    }

    #[test]
    fn test_register_rejects_overlap() {
        let mut allocator = allocator_with_pages(4);
        assert_eq!(
            allocator.register_region(REGION_BASE + TEST_PAGE_SIZE, 4 * TEST_PAGE_SIZE),
            Err(AllocError::MemoryOverlap)
        );
        assert_eq!(allocator.total_bytes(), 4 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_register_adjacent_regions_merge() {
        let mut allocator = allocator_with_pages(4);
        allocator
            .register_region(REGION_BASE + 4 * TEST_PAGE_SIZE, 4 * TEST_PAGE_SIZE)
            .unwrap();
        assert_eq!(allocator.extent_count(), 1);
        assert_eq!(allocator.total_bytes(), 8 * TEST_PAGE_SIZE);
        assert_eq!(
            allocator.alloc_page_range(8 * TEST_PAGE_SIZE),
            Ok(REGION_BASE)
        );
    }

    #[test]
    fn test_total_reports_capacity_not_availability() {
        let mut allocator = allocator_with_pages(4);
        let addr = allocator.alloc_page().unwrap();
        assert_eq!(allocator.total_bytes(), 4 * TEST_PAGE_SIZE);
        assert_eq!(allocator.free_bytes(), 3 * TEST_PAGE_SIZE);
        allocator.free_page(addr);
        assert_eq!(allocator.free_bytes(), 4 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_range_rounds_up_and_splits() {
        let mut allocator = allocator_with_pages(8);
        let addr = allocator.alloc_page_range(TEST_PAGE_SIZE + 1).unwrap();
        assert_eq!(addr, REGION_BASE);
        assert_eq!(allocator.free_bytes(), 6 * TEST_PAGE_SIZE);
        assert_eq!(
            allocator.extents().next(),
            Some(Extent::new(REGION_BASE + 2 * TEST_PAGE_SIZE, 6 * TEST_PAGE_SIZE))
        );

        allocator.free_page_range(addr, TEST_PAGE_SIZE + 1);
        assert_eq!(allocator.extent_count(), 1);
        assert_eq!(allocator.free_bytes(), 8 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_zero_sized_range() {
        let mut allocator = allocator_with_pages(1);
        assert_eq!(allocator.alloc_page_range(0), Err(AllocError::InvalidParam));
    }

    #[test]
    fn test_adjacent_pages_coalesce_in_either_order() {
        for reverse in [false, true] {
            let mut allocator = allocator_with_pages(3);
            let a = allocator.alloc_page().unwrap();
            let b = allocator.alloc_page().unwrap();
            assert_eq!(b, a + TEST_PAGE_SIZE);
            let before = allocator.extent_count();

            if reverse {
                allocator.free_page(b);
                allocator.free_page(a);
            } else {
                allocator.free_page(a);
                allocator.free_page(b);
            }

            assert!(allocator.extent_count() <= before);
            assert_eq!(allocator.extent_count(), 1);
            assert_eq!(allocator.alloc_page_range(2 * TEST_PAGE_SIZE), Ok(a));
        }
    }

    #[test]
    fn test_hole_coalesces_with_both_neighbours() {
        let mut allocator = allocator_with_pages(3);
        let pages: Vec<usize> = (0..3).map(|_| allocator.alloc_page().unwrap()).collect();
        allocator.free_page(pages[0]);
        allocator.free_page(pages[2]);
        assert_eq!(allocator.extent_count(), 2);

        allocator.free_page(pages[1]);
        assert_eq!(allocator.extent_count(), 1);
        assert_eq!(allocator.largest_extent(), 3 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut allocator = allocator_with_pages(2);
        let addr = allocator.alloc_page().unwrap();
        allocator.free_page(addr);
        allocator.free_page(addr);
        assert_eq!(allocator.free_bytes(), 2 * TEST_PAGE_SIZE);
        assert_eq!(allocator.extent_count(), 1);
    }

    #[test]
    fn test_first_fit_prefers_lowest_address() {
        let mut allocator = allocator_with_pages(6);
        let pages: Vec<usize> = (0..6).map(|_| allocator.alloc_page().unwrap()).collect();
        allocator.free_page(pages[4]);
        allocator.free_page(pages[1]);

        assert_eq!(allocator.alloc_page(), Ok(pages[1]));
        assert_eq!(allocator.alloc_page(), Ok(pages[4]));
        assert_eq!(allocator.alloc_page(), Err(AllocError::NoMemory));
    }

    #[test]
    fn test_alloc_range_at() {
        let mut allocator = allocator_with_pages(8);
        let base = REGION_BASE + 2 * TEST_PAGE_SIZE;
        assert_eq!(allocator.alloc_range_at(base, 2 * TEST_PAGE_SIZE), Ok(base));
        assert_eq!(allocator.extent_count(), 2);
        assert_eq!(allocator.free_bytes(), 6 * TEST_PAGE_SIZE);

        // Already taken
        assert_eq!(
            allocator.alloc_range_at(base + TEST_PAGE_SIZE, TEST_PAGE_SIZE),
            Err(AllocError::NoMemory)
        );
        // Runs past the end of the region
        assert_eq!(
            allocator.alloc_range_at(REGION_BASE + 7 * TEST_PAGE_SIZE, 2 * TEST_PAGE_SIZE),
            Err(AllocError::NoMemory)
        );

        allocator.free_page_range(base, 2 * TEST_PAGE_SIZE);
        assert_eq!(allocator.extent_count(), 1);
    }

    #[test]
    fn test_alloc_range_at_rejects_huge_size() {
        let mut allocator = allocator_with_pages(8);
        assert_eq!(
            allocator.alloc_range_at(REGION_BASE, usize::MAX),
            Err(AllocError::NoMemory)
        );
        assert_eq!(
            allocator.alloc_range_at(REGION_BASE, usize::MAX - REGION_BASE),
            Err(AllocError::NoMemory)
        );
        assert_eq!(allocator.free_bytes(), 8 * TEST_PAGE_SIZE);
        assert_eq!(allocator.extent_count(), 1);
        assert_eq!(
            allocator.alloc_page_range(8 * TEST_PAGE_SIZE),
            Ok(REGION_BASE)
        );
    }

    #[test]
    fn test_free_of_huge_size_is_ignored() {
        let mut allocator = allocator_with_pages(2);
        let addr = allocator.alloc_page().unwrap();
        allocator.free_page_range(addr, usize::MAX);
        assert_eq!(allocator.free_bytes(), TEST_PAGE_SIZE);
        allocator.free_page(addr);
        assert_eq!(allocator.free_bytes(), 2 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_free_initial_memory_range_trims_to_pages() {
        let mut allocator = PageRangeAllocator::<TEST_PAGE_SIZE>::new();
        allocator
            .free_initial_memory_range(REGION_BASE + 0x10, 3 * TEST_PAGE_SIZE)
            .unwrap();
        assert_eq!(allocator.total_bytes(), 2 * TEST_PAGE_SIZE);
        assert_eq!(
            allocator.extents().next(),
            Some(Extent::new(REGION_BASE + TEST_PAGE_SIZE, 2 * TEST_PAGE_SIZE))
        );

        allocator
            .free_initial_memory_range(REGION_BASE + 0x20_0010, TEST_PAGE_SIZE)
            .unwrap();
        assert_eq!(allocator.total_bytes(), 2 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_free_initial_memory_range_at_top_of_address_space() {
        let mut allocator = PageRangeAllocator::<TEST_PAGE_SIZE>::new();
        assert_eq!(allocator.free_initial_memory_range(usize::MAX - 10, 5), Ok(()));
        assert_eq!(
            allocator.free_initial_memory_range(usize::MAX - 0x800, 0x800),
            Ok(())
        );
        assert_eq!(allocator.total_bytes(), 0);
        assert_eq!(allocator.extent_count(), 0);
    }

    #[test]
    fn test_donate_range_moves_capacity() {
        let mut cpu0 = allocator_with_pages(8);
        let mut cpu1 = PageRangeAllocator::<TEST_PAGE_SIZE>::new();

        let addr = cpu0.donate_range(3 * TEST_PAGE_SIZE, &mut cpu1).unwrap();
        assert_eq!(addr, REGION_BASE);
        assert_eq!(cpu0.total_bytes(), 5 * TEST_PAGE_SIZE);
        assert_eq!(cpu1.total_bytes(), 3 * TEST_PAGE_SIZE);
        assert_eq!(cpu1.alloc_page_range(3 * TEST_PAGE_SIZE), Ok(REGION_BASE));

        assert_eq!(
            cpu0.donate_range(6 * TEST_PAGE_SIZE, &mut cpu1),
            Err(AllocError::NoMemory)
        );
        assert_eq!(cpu0.free_bytes(), 5 * TEST_PAGE_SIZE);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut allocator = allocator_with_pages(4);
        let addr = allocator.alloc_page_range(2 * TEST_PAGE_SIZE).unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.total_bytes, 4 * TEST_PAGE_SIZE);
        assert_eq!(stats.free_bytes, 2 * TEST_PAGE_SIZE);
        assert_eq!(stats.used_bytes(), 2 * TEST_PAGE_SIZE);
        assert_eq!(stats.extent_count, 1);
        assert_eq!(stats.largest_extent, 2 * TEST_PAGE_SIZE);
        allocator.free_page_range(addr, 2 * TEST_PAGE_SIZE);
    }
}
