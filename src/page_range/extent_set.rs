//! Ordered set of free extents
//!
//! Free extents are kept in a map keyed by start address, outside of the
//! memory they describe, so the allocator can track ranges it is not able
//! to dereference.

use alloc::collections::BTreeMap;

/// A contiguous run of free memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: usize,
    pub size: usize,
}

impl Extent {
    pub const fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }

    pub const fn end(&self) -> usize {
        self.start + self.size
    }

    /// Whether `[start, start + size)` lies entirely inside this extent
    pub const fn contains_range(&self, start: usize, size: usize) -> bool {
        match start.checked_add(size) {
            Some(end) => start >= self.start && end <= self.end(),
            None => false,
        }
    }
}

/// Address-ordered set of non-overlapping extents
pub struct ExtentSet {
    extents: BTreeMap<usize, usize>,
}

impl ExtentSet {
    pub const fn new() -> Self {
        Self {
            extents: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Extent> + '_ {
        self.extents
            .iter()
            .map(|(&start, &size)| Extent::new(start, size))
    }

    /// Closest extent starting strictly below `addr`
    pub fn predecessor(&self, addr: usize) -> Option<Extent> {
        self.extents
            .range(..addr)
            .next_back()
            .map(|(&start, &size)| Extent::new(start, size))
    }

    /// Closest extent starting at or above `addr`
    pub fn successor(&self, addr: usize) -> Option<Extent> {
        self.extents
            .range(addr..)
            .next()
            .map(|(&start, &size)| Extent::new(start, size))
    }

    /// Extent that covers `addr`, if any
    pub fn containing(&self, addr: usize) -> Option<Extent> {
        self.extents
            .range(..=addr)
            .next_back()
            .map(|(&start, &size)| Extent::new(start, size))
            .filter(|extent| addr < extent.end())
    }

    /// Whether `[start, start + size)` intersects any extent in the set
    pub fn overlaps(&self, start: usize, size: usize) -> bool {
        let end = start.saturating_add(size);
        if let Some(pred) = self.predecessor(start) {
            if pred.end() > start {
                return true;
            }
        }
        match self.successor(start) {
            Some(succ) => succ.start < end,
            None => false,
        }
    }

    /// First extent in address order of at least `size` bytes
    pub fn first_fit(&self, size: usize) -> Option<Extent> {
        self.iter().find(|extent| extent.size >= size)
    }

    pub fn remove(&mut self, start: usize) -> Option<Extent> {
        self.extents
            .remove(&start)
            .map(|size| Extent::new(start, size))
    }

    /// Insert an extent without merging
    ///
    /// The caller guarantees it neither overlaps nor touches a neighbour.
    pub fn insert_raw(&mut self, extent: Extent) {
        debug_assert!(extent.size > 0);
        debug_assert!(!self.overlaps(extent.start, extent.size));
        self.extents.insert(extent.start, extent.size);
    }

    /// Insert an extent and merge it with address-adjacent neighbours.
    ///
    /// Returns the extent as stored after merging.
    pub fn insert_merged(&mut self, extent: Extent) -> Extent {
        let mut merged = extent;

        if let Some(pred) = self.predecessor(merged.start) {
            if pred.end() == merged.start {
                self.extents.remove(&pred.start);
                merged = Extent::new(pred.start, pred.size + merged.size);
            }
        }

        if let Some(size) = self.extents.remove(&merged.end()) {
            merged.size += size;
        }

        self.insert_raw(merged);
        merged
    }
}

impl Default for ExtentSet {
    fn default() -> Self {
        Self::new()
    }
}
