//! Chunk sizing strategies.
//!
//! Chunks bound how many images' pixels and codes are materialized at once.
//! They never run concurrently.

use std::fmt;
use std::ops::Range;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::types::InputShape;

/// Decides how many items go into one chunk.
pub trait ChunkSizer: fmt::Debug + Send + Sync {
    /// Items per chunk given one item's footprint and the memory budget,
    /// both in bytes. Must return at least 1.
    fn chunk_size(&self, item_footprint: usize, budget: usize) -> usize;
}

/// Constant chunk size, independent of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedChunkSizer {
    size: usize,
}

impl FixedChunkSizer {
    /// Chunks of `size` items (at least 1).
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for FixedChunkSizer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkSizer for FixedChunkSizer {
    fn chunk_size(&self, _item_footprint: usize, _budget: usize) -> usize {
        self.size
    }
}

/// As many items as fit in the budget, between 1 and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetChunkSizer {
    max: usize,
}

impl BudgetChunkSizer {
    /// Cap chunks at `max` items (at least 1).
    pub fn new(max: usize) -> Self {
        Self { max: max.max(1) }
    }
}

impl ChunkSizer for BudgetChunkSizer {
    fn chunk_size(&self, item_footprint: usize, budget: usize) -> usize {
        (budget / item_footprint.max(1)).clamp(1, self.max)
    }
}

/// Bytes held per image while its chunk is in flight: one input tensor and
/// one code per patch.
pub fn image_footprint(shape: InputShape, dim: usize, patches: usize) -> usize {
    patches * (shape.len() + dim) * std::mem::size_of::<f32>()
}

/// Consecutive `size`-item ranges covering `0..total`.
pub fn chunk_ranges(total: usize, size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = size.max(1);
    (0..total).step_by(size).map(move |start| start..(start + size).min(total))
}
