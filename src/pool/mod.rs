//! Object pool implementation.
//!
//! This module implements fixed-size object pools carved out of single pages,
//! and the ladder of power-of-two pools used for general-purpose allocation.

pub mod object_pool;
pub(crate) mod pool_page;
pub mod pool_ladder;

// Re-export public types
pub use object_pool::{ObjectPool, PoolId, PoolStats};
pub use pool_ladder::{PoolLadder, CLASS_COUNT};

/// Smallest object a pool serves: a free slot must hold one link.
pub const MIN_OBJECT_SIZE: usize = core::mem::size_of::<usize>();

/// Largest object a pool serves; bigger requests go to the page-range allocator.
pub const MAX_OBJECT_SIZE: usize = 1024;
