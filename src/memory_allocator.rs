//! Locked allocator instance.
//!
//! Combines one page-range allocator and one pool ladder behind
//! `SpinNoIrq` locks so a single instance can be shared between CPUs.
//! The ladder lock is always taken before the page lock.

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, error};

use crate::page_range::{PageRangeAllocator, PageRangeStats};
use crate::pool::{PoolLadder, PoolStats, CLASS_COUNT, MAX_OBJECT_SIZE};
use crate::{AllocError, AllocResult};

/// Page-range allocator and pool ladder sharing one set of registered memory
pub struct MemoryAllocator<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    ladder: SpinNoIrq<PoolLadder<PAGE_SIZE>>,
    pages: SpinNoIrq<PageRangeAllocator<PAGE_SIZE>>,
}

impl<const PAGE_SIZE: usize> MemoryAllocator<PAGE_SIZE> {
    pub fn new() -> Self {
        Self {
            ladder: SpinNoIrq::new(PoolLadder::new()),
            pages: SpinNoIrq::new(PageRangeAllocator::new()),
        }
    }

    /// Add a page-aligned free memory region.
    pub fn register_region(&self, start: usize, bytes: usize) -> AllocResult {
        self.pages.lock().register_region(start, bytes)
    }

    /// Add an early-boot range, trimmed inward to whole pages.
    pub fn free_initial_memory_range(&self, start: usize, bytes: usize) -> AllocResult {
        self.pages.lock().free_initial_memory_range(start, bytes)
    }

    pub fn alloc_page(&self) -> AllocResult<usize> {
        self.pages.lock().alloc_page()
    }

    pub fn free_page(&self, addr: usize) {
        self.pages.lock().free_page(addr)
    }

    pub fn alloc_page_range(&self, bytes: usize) -> AllocResult<usize> {
        self.pages.lock().alloc_page_range(bytes)
    }

    pub fn free_page_range(&self, addr: usize, bytes: usize) {
        self.pages.lock().free_page_range(addr, bytes)
    }

    /// Allocate `size` bytes from the pool ladder, or as a page range when
    /// `size` exceeds the largest size class.
    pub fn malloc(&self, size: usize) -> AllocResult<usize> {
        if size > MAX_OBJECT_SIZE {
            return self.pages.lock().alloc_page_range(size);
        }
        let mut ladder = self.ladder.lock();
        let mut pages = self.pages.lock();
        ladder.malloc(size, &mut *pages).inspect_err(|_| {
            debug!("memory allocator: malloc({}) failed", size);
        })
    }

    /// Free a pool object returned by [`Self::malloc`].
    ///
    /// Returns [`AllocError::NotAllocated`] for page-range allocations, which
    /// must be released with [`Self::free_page_range`] or [`Self::free_sized`].
    ///
    /// # Safety
    ///
    /// `addr` must be a live allocation returned by [`Self::malloc`] on this
    /// instance.
    pub unsafe fn free(&self, addr: usize) -> AllocResult {
        let mut ladder = self.ladder.lock();
        let mut pages = self.pages.lock();
        ladder.free(addr, &mut *pages)
    }

    /// Free an allocation returned by [`Self::malloc`] for `size` bytes.
    ///
    /// # Safety
    ///
    /// Same as [`Self::free`], and `size` must be the size passed to `malloc`.
    pub unsafe fn free_sized(&self, addr: usize, size: usize) -> AllocResult {
        if size > MAX_OBJECT_SIZE {
            self.pages.lock().free_page_range(addr, size);
            return Ok(());
        }
        let mut ladder = self.ladder.lock();
        let mut pages = self.pages.lock();
        ladder.free_sized(addr, size, &mut *pages)
    }

    /// Move `bytes` of free memory into another instance, e.g. a per-CPU one.
    ///
    /// Page locks of both instances are taken in address order.
    pub fn donate_range(&self, bytes: usize, dest: &Self) -> AllocResult<usize> {
        if core::ptr::eq(self, dest) {
            error!("memory allocator: donation to self");
            return Err(AllocError::InvalidParam);
        }
        if (self as *const Self) < (dest as *const Self) {
            let mut src = self.pages.lock();
            let mut dst = dest.pages.lock();
            src.donate_range(bytes, &mut *dst)
        } else {
            let mut dst = dest.pages.lock();
            let mut src = self.pages.lock();
            src.donate_range(bytes, &mut *dst)
        }
    }

    /// Total memory registered with this instance
    pub fn total_memory(&self) -> usize {
        self.pages.lock().total_bytes()
    }

    /// Memory held in free extents, excluding spare pool slots
    pub fn free_memory(&self) -> usize {
        self.pages.lock().free_bytes()
    }

    pub fn page_stats(&self) -> PageRangeStats {
        self.pages.lock().stats()
    }

    pub fn pool_stats(&self) -> [PoolStats; CLASS_COUNT] {
        self.ladder.lock().stats()
    }
}

impl<const PAGE_SIZE: usize> Default for MemoryAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
