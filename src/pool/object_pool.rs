//! Object pool implementation for a single object size.
//!
//! An `ObjectPool` owns a set of pool pages and keeps the ones with at least
//! one free slot on a spare list linked through the page headers, most
//! recently refilled page first. Emptied pages go back to the page source
//! immediately.

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "log")]
use log::{error, warn};

use super::pool_page::PoolPage;
use super::{MAX_OBJECT_SIZE, MIN_OBJECT_SIZE};
use crate::{AllocError, AllocResult, PageSource};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of an object pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl PoolId {
    fn next() -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        assert_ne!(id, 0, "object pool: pool id space exhausted");
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Object pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub object_size: usize,
    pub objects_per_page: usize,
    pub pages: usize,
    pub spare_pages: usize,
    pub allocated_objects: usize,
}

/// Pool of fixed-size objects
pub struct ObjectPool<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    id: PoolId,
    object_size: usize,
    spare_head: Option<usize>,
    spare_pages: usize,
    pages: usize,
    allocated: usize,
}

impl<const PAGE_SIZE: usize> ObjectPool<PAGE_SIZE> {
    /// Bytes at the start of every pool page taken by its header
    pub const HEADER_SIZE: usize = PoolPage::<PAGE_SIZE>::HEADER_SIZE;

    /// Create a pool serving objects of `object_size` bytes.
    ///
    /// The size is rounded up to a multiple of the pointer width.
    ///
    /// # Panics
    ///
    /// Panics if `object_size` is zero or larger than [`MAX_OBJECT_SIZE`],
    /// or if all `u32::MAX` pool identities have been handed out.
    pub fn new(object_size: usize) -> Self {
        assert!(
            object_size > 0 && object_size <= MAX_OBJECT_SIZE,
            "object pool: unsupported object size {}",
            object_size
        );
        assert!(PAGE_SIZE.is_power_of_two() && PAGE_SIZE >= 4 * MAX_OBJECT_SIZE);
        Self {
            id: PoolId::next(),
            object_size: crate::align_up(object_size, MIN_OBJECT_SIZE),
            spare_head: None,
            spare_pages: 0,
            pages: 0,
            allocated: 0,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn objects_per_page(&self) -> usize {
        PoolPage::<PAGE_SIZE>::slots_per_page(self.object_size)
    }

    /// Pages currently owned by the pool
    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Pages with at least one free slot
    pub fn spare_page_count(&self) -> usize {
        self.spare_pages
    }

    pub fn allocated_objects(&self) -> usize {
        self.allocated
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            object_size: self.object_size,
            objects_per_page: self.objects_per_page(),
            pages: self.pages,
            spare_pages: self.spare_pages,
            allocated_objects: self.allocated,
        }
    }

    /// Allocate one object, taking a new page from `pages` if needed.
    pub fn alloc(&mut self, pages: &mut dyn PageSource) -> AllocResult<usize> {
        if let Some(obj_addr) = self.alloc_from_spare() {
            return Ok(obj_addr);
        }
        self.add_page(pages)?;
        self.alloc_from_spare().ok_or(AllocError::NoMemory)
    }

    fn alloc_from_spare(&mut self) -> Option<usize> {
        let mut page = PoolPage::<PAGE_SIZE>::new(self.spare_head?);
        let Some(obj_addr) = page.pop_free() else {
            panic!("Spare page {:#x} has no free slot, free chain corrupted", page.addr);
        };
        if page.is_full() {
            self.unlink_spare(&mut page);
        }
        self.allocated += 1;
        Some(obj_addr)
    }

    fn add_page(&mut self, pages: &mut dyn PageSource) -> AllocResult {
        let page_base = pages.alloc_page()?;
        debug_assert!(crate::is_aligned(page_base, PAGE_SIZE));

        let mut page = PoolPage::<PAGE_SIZE>::new(page_base);
        page.format(self.id.0, self.object_size);
        self.link_spare(&mut page);
        self.pages += 1;
        Ok(())
    }

    fn link_spare(&mut self, page: &mut PoolPage<PAGE_SIZE>) {
        page.link_front(&mut self.spare_head);
        self.spare_pages += 1;
    }

    fn unlink_spare(&mut self, page: &mut PoolPage<PAGE_SIZE>) {
        page.unlink(&mut self.spare_head);
        self.spare_pages -= 1;
    }

    /// Return an object to the pool.
    ///
    /// A page whose last object is freed is handed back to `pages` at once.
    ///
    /// # Safety
    ///
    /// `obj_addr` must have been returned by [`Self::alloc`] on this pool and
    /// not freed since.
    pub unsafe fn free(&mut self, obj_addr: usize, pages: &mut dyn PageSource) {
        let mut page = PoolPage::<PAGE_SIZE>::containing(obj_addr);
        if !page.is_pool_page() || page.owner() != self.id.0 {
            error!(
                "object pool {}: free of foreign object {:#x} ignored",
                self.id.0, obj_addr
            );
            return;
        }
        debug_assert!(page.slot_index(obj_addr).is_some());
        debug_assert!(page.allocated() > 0);

        let was_full = page.is_full();
        page.push_free(obj_addr);
        self.allocated -= 1;

        if page.is_unused() {
            if !was_full {
                self.unlink_spare(&mut page);
            }
            page.retire();
            self.pages -= 1;
            pages.free_page(page.addr);
            return;
        }

        if was_full {
            self.link_spare(&mut page);
        }
    }

    /// Identity of the pool owning the object at `obj_addr`.
    ///
    /// Returns `None` if the surrounding page is not a pool page.
    ///
    /// # Safety
    ///
    /// The page containing `obj_addr` must be mapped and readable.
    pub unsafe fn from_object(obj_addr: usize) -> Option<PoolId> {
        let page = PoolPage::<PAGE_SIZE>::containing(obj_addr);
        page.is_pool_page().then(|| PoolId(page.owner()))
    }
}

impl<const PAGE_SIZE: usize> Drop for ObjectPool<PAGE_SIZE> {
    fn drop(&mut self) {
        if self.pages > 0 {
            warn!(
                "object pool {}: dropped with {} pages and {} live objects of {} bytes",
                self.id.0, self.pages, self.allocated, self.object_size
            );
        }
    }
}
