//! Chunked persistence of a reference collection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::chunking::{chunk_ranges, image_footprint, ChunkSizer};
use super::CodeExtractor;
use crate::errors::{NcError, Result};
use crate::store::NeuralCodeStore;
use crate::types::{patches_per_image, PatchLevel};

/// Summary of a persist run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReport {
    /// Images written.
    pub images: usize,
    /// Codes written.
    pub columns: usize,
    /// Code length.
    pub dim: usize,
    /// Codes per image.
    pub patches_per_image: usize,
    /// Images in each chunk, in write order.
    pub chunk_images: Vec<usize>,
}

impl PersistReport {
    /// Number of chunks appended.
    pub fn chunks(&self) -> usize {
        self.chunk_images.len()
    }
}

/// Resolve file names against the collection base path.
pub fn resolve_files(imbase_path: &Path, imbase_files: &[String]) -> Vec<PathBuf> {
    imbase_files.iter().map(|f| imbase_path.join(f)).collect()
}

/// Drives extraction chunk by chunk and appends every chunk to a store.
///
/// Chunks run strictly in sequence; a chunk is flushed before the next one
/// starts. A failure leaves the whole chunks written so far in the store.
#[derive(Debug)]
pub struct BatchedStoreWriter<'a> {
    sizer: &'a dyn ChunkSizer,
    memory_budget: usize,
}

impl<'a> BatchedStoreWriter<'a> {
    /// Create a writer using `sizer` against a budget in bytes.
    pub fn new(sizer: &'a dyn ChunkSizer, memory_budget: usize) -> Self {
        Self { sizer, memory_budget }
    }

    /// Persist codes of every image at a single level.
    pub fn persist<X: CodeExtractor + ?Sized>(
        &self,
        store: &mut NeuralCodeStore,
        imbase_path: &Path,
        imbase_files: &[String],
        extractor: &mut X,
        layer: &str,
        level: PatchLevel,
    ) -> Result<PersistReport> {
        self.persist_levels(store, imbase_path, imbase_files, extractor, layer, &[level])
    }

    /// Persist codes of every image at every level in `levels`, each image's
    /// columns level by level.
    pub fn persist_levels<X: CodeExtractor + ?Sized>(
        &self,
        store: &mut NeuralCodeStore,
        imbase_path: &Path,
        imbase_files: &[String],
        extractor: &mut X,
        layer: &str,
        levels: &[PatchLevel],
    ) -> Result<PersistReport> {
        if imbase_files.is_empty() {
            return Err(NcError::invalid("no reference images to persist"));
        }
        if levels.is_empty() {
            return Err(NcError::invalid("no patch levels requested"));
        }
        let files = resolve_files(imbase_path, imbase_files);
        let dim = extractor.code_dim(layer)?;
        let per_image = patches_per_image(levels);
        let footprint = image_footprint(extractor.input_shape(), dim, per_image);
        let chunk_size = self.sizer.chunk_size(footprint, self.memory_budget).max(1);

        info!(
            "Persisting {} images to {} in chunks of {} ({} bytes per image)",
            files.len(),
            store.path().display(),
            chunk_size,
            footprint
        );

        let mut report = PersistReport {
            images: 0,
            columns: 0,
            dim,
            patches_per_image: per_image,
            chunk_images: Vec::new(),
        };
        for range in chunk_ranges(files.len(), chunk_size) {
            let codes = extractor.extract_levels(&files[range.clone()], levels, layer)?;
            store.append(codes.view())?;

            report.images += range.len();
            report.columns += codes.ncols();
            report.chunk_images.push(range.len());
            info!(
                "Chunk {}: images {}..{} ({} codes)",
                report.chunks(),
                range.start,
                range.end,
                codes.ncols()
            );
        }

        Ok(report)
    }
}
