//! Page-range allocator module
//!
//! This module provides the page-granularity tier:
//! - Address-ordered set of free extents with O(log n) neighbour lookup
//! - First-fit allocation with split remainders re-inserted
//! - Eager coalescing of address-adjacent free extents
//! - Statistics and failure reporting

pub mod extent_set;
pub mod page_range_allocator;
pub mod stats;

pub use extent_set::{Extent, ExtentSet};
pub use page_range_allocator::PageRangeAllocator;
pub use stats::PageRangeStats;
