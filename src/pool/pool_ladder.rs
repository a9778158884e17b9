//! Pool ladder implementation.
//!
//! A fixed set of object pools whose sizes double from [`MIN_OBJECT_SIZE`]
//! to [`MAX_OBJECT_SIZE`]. A request is served by the smallest class that
//! covers it, so at most just under half of an object is wasted. Requests
//! above the largest class go straight to the page source.

#[cfg(feature = "log")]
use log::warn;

use super::object_pool::{ObjectPool, PoolStats};
use super::{MAX_OBJECT_SIZE, MIN_OBJECT_SIZE};
use crate::{AllocError, AllocResult, PageSource};

/// Number of size classes in the ladder
pub const CLASS_COUNT: usize = (MAX_OBJECT_SIZE / MIN_OBJECT_SIZE).trailing_zeros() as usize + 1;

/// Power-of-two ladder of object pools
pub struct PoolLadder<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    pools: [ObjectPool<PAGE_SIZE>; CLASS_COUNT],
}

impl<const PAGE_SIZE: usize> PoolLadder<PAGE_SIZE> {
    const PAGE_SIZE_OK: () = assert!(
        PAGE_SIZE.is_power_of_two() && PAGE_SIZE >= 4 * MAX_OBJECT_SIZE,
        "pool ladder: page size too small for the largest size class"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::PAGE_SIZE_OK;
        Self {
            pools: core::array::from_fn(|index| ObjectPool::new(Self::class_size(index))),
        }
    }

    /// Object size of class `index`
    pub const fn class_size(index: usize) -> usize {
        MIN_OBJECT_SIZE << index
    }

    /// Smallest class whose object size covers `size`
    pub const fn class_index(size: usize) -> Option<usize> {
        if size > MAX_OBJECT_SIZE {
            return None;
        }
        let size = if size < MIN_OBJECT_SIZE {
            MIN_OBJECT_SIZE
        } else {
            size
        };
        Some((size.next_power_of_two().trailing_zeros() - MIN_OBJECT_SIZE.trailing_zeros()) as usize)
    }

    pub fn pool(&self, index: usize) -> Option<&ObjectPool<PAGE_SIZE>> {
        self.pools.get(index)
    }

    /// Allocate `size` bytes.
    ///
    /// Requests above [`MAX_OBJECT_SIZE`] are served as a page range and
    /// carry no size information: the caller must remember the size and
    /// release them with `free_page_range` (or [`Self::free_sized`]).
    pub fn malloc(&mut self, size: usize, pages: &mut dyn PageSource) -> AllocResult<usize> {
        match Self::class_index(size) {
            Some(index) => self.pools[index].alloc(pages),
            None => pages.alloc_page_range(size),
        }
    }

    /// Free an object allocated by [`Self::malloc`].
    ///
    /// Page-aligned addresses are never pool objects; for those this returns
    /// [`AllocError::NotAllocated`] and the caller must release the range
    /// itself.
    ///
    /// # Safety
    ///
    /// `addr` must be a live allocation returned by [`Self::malloc`] on this
    /// ladder.
    pub unsafe fn free(&mut self, addr: usize, pages: &mut dyn PageSource) -> AllocResult {
        if crate::is_aligned(addr, PAGE_SIZE) {
            return Err(AllocError::NotAllocated);
        }
        let id = ObjectPool::<PAGE_SIZE>::from_object(addr).ok_or(AllocError::NotAllocated)?;
        let Some(pool) = self.pools.iter_mut().find(|pool| pool.id() == id) else {
            warn!(
                "pool ladder: object {:#x} belongs to pool {} outside the ladder",
                addr,
                id.as_u32()
            );
            return Err(AllocError::NotAllocated);
        };
        pool.free(addr, pages);
        Ok(())
    }

    /// Free an allocation whose requested size is known.
    ///
    /// # Safety
    ///
    /// `addr` must be a live allocation returned by [`Self::malloc`] on this
    /// ladder for the same `size`.
    pub unsafe fn free_sized(
        &mut self,
        addr: usize,
        size: usize,
        pages: &mut dyn PageSource,
    ) -> AllocResult {
        if Self::class_index(size).is_none() {
            pages.free_page_range(addr, size);
            return Ok(());
        }
        self.free(addr, pages)
    }

    pub fn stats(&self) -> [PoolStats; CLASS_COUNT] {
        core::array::from_fn(|index| self.pools[index].stats())
    }
}

impl<const PAGE_SIZE: usize> Default for PoolLadder<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
