//! Range/slab physical memory allocator
//!
//! This crate implements the bottom-of-stack memory allocator of a kernel,
//! featuring:
//! - Page-range allocator tracking free memory as coalescing extents
//! - Fixed-size object pools (slabs) carved out of single pages
//! - A ladder of power-of-two pools for general-purpose allocation
//! - A locked allocator instance combining both tiers
//!
//! Memory handed to a [`PageSource`] that backs an [`ObjectPool`] must be
//! mapped and writable: pools embed their page headers and free chains in
//! the pages themselves. The page-range allocator on its own never touches
//! the memory it manages.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid `size` or address. (e.g. unaligned)
    InvalidParam,
    /// Memory registered by `register_region` overlapped with free memory.
    MemoryOverlap,
    /// No enough memory to allocate.
    NoMemory,
    /// The address was not allocated by this allocator tier.
    NotAllocated,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AllocError::InvalidParam => "invalid size or alignment",
            AllocError::MemoryOverlap => "memory region overlaps free memory",
            AllocError::NoMemory => "out of memory",
            AllocError::NotAllocated => "address not allocated by this allocator",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Page-granularity memory source used by object pools and the pool ladder.
///
/// All addresses are multiples of the page size of the implementor.
pub trait PageSource {
    /// Allocate a single page.
    fn alloc_page(&mut self) -> AllocResult<usize>;

    /// Return a single page previously obtained from [`PageSource::alloc_page`].
    fn free_page(&mut self, addr: usize);

    /// Allocate a contiguous range of at least `bytes` bytes, rounded up to pages.
    fn alloc_page_range(&mut self, bytes: usize) -> AllocResult<usize>;

    /// Return a range previously obtained from [`PageSource::alloc_page_range`].
    fn free_page_range(&mut self, addr: usize, bytes: usize);
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod page_range;
pub use page_range::{PageRangeAllocator, PageRangeStats};

pub mod pool;
pub use pool::{
    ObjectPool, PoolId, PoolLadder, PoolStats, CLASS_COUNT, MAX_OBJECT_SIZE, MIN_OBJECT_SIZE,
};

pub mod memory_allocator;
pub use memory_allocator::MemoryAllocator;
