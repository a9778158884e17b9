//! Statistics and debugging for the page-range allocator
//!
//! Provides a snapshot of the free-extent set and a detailed failure report.

use super::extent_set::Extent;

/// Page-range allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRangeStats {
    /// Bytes ever registered with the allocator
    pub total_bytes: usize,
    /// Bytes currently held in free extents
    pub free_bytes: usize,
    /// Number of free extents
    pub extent_count: usize,
    /// Size of the largest free extent
    pub largest_extent: usize,
}

impl PageRangeStats {
    pub const fn new() -> Self {
        Self {
            total_bytes: 0,
            free_bytes: 0,
            extent_count: 0,
            largest_extent: 0,
        }
    }

    pub const fn used_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

/// Detailed memory statistics reporter
pub struct MemoryStatsReporter;

impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats<'a>(
        page_size: usize,
        stats: &PageRangeStats,
        extents: impl Iterator<Item = Extent> + 'a,
        request_bytes: usize,
    ) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!(
            "Request: {} pages ({} KB)",
            request_bytes / page_size,
            request_bytes / 1024
        );
        error!("Overall Memory State:");
        error!("  Total: {} KB", stats.total_bytes / 1024);
        error!("  Free: {} KB", stats.free_bytes / 1024);
        error!("  Used: {} KB", stats.used_bytes() / 1024);
        error!(
            "  Free extents: {}, largest {} KB",
            stats.extent_count,
            stats.largest_extent / 1024
        );
        error!("----------------------------------------");
        for extent in extents {
            error!(
                "  [{:#x}, {:#x}) {} pages",
                extent.start,
                extent.end(),
                extent.size / page_size
            );
        }
        error!("========================================");
    }
}
