//! High-level pipelines: patch extraction and chunked persistence.

pub mod chunking;
pub mod extract;
pub mod parallel;
pub mod persist;

use std::path::PathBuf;

use ndarray::Array2;

use crate::errors::Result;
use crate::types::{InputShape, PatchLevel};

pub use chunking::{chunk_ranges, image_footprint, BudgetChunkSizer, ChunkSizer, FixedChunkSizer};
pub use extract::FeatureExtractionPipeline;
pub use parallel::ParallelExtractionPipeline;
pub use persist::{resolve_files, BatchedStoreWriter, PersistReport};

/// Anything that turns images into a D x N neural code matrix.
///
/// Columns are ordered image, then level, then patch (row-major within the
/// grid). Both pipelines honor this order.
pub trait CodeExtractor {
    /// Input shape of the underlying engine.
    fn input_shape(&self) -> InputShape;

    /// Code length D for `layer`.
    fn code_dim(&self, layer: &str) -> Result<usize>;

    /// Codes of every patch of every image at every level in `levels`.
    fn extract_levels(
        &mut self,
        images: &[PathBuf],
        levels: &[PatchLevel],
        layer: &str,
    ) -> Result<Array2<f32>>;

    /// Codes at a single level: `images.len() * level²` columns.
    fn extract(&mut self, images: &[PathBuf], level: PatchLevel, layer: &str) -> Result<Array2<f32>> {
        self.extract_levels(images, &[level], layer)
    }
}
