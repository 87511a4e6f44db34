//! Parallel extraction with one engine handle per worker.
//!
//! Patches are data-independent, so the prepared tensors of a call are split
//! into contiguous slices, one per handle, and run on the rayon pool. Each
//! slice's codes come back in slice order, which restores generation order
//! no matter which worker finishes first.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;
use tracing::info;

use super::extract::{image_patches, run_patch, ExtractionPlan};
use super::CodeExtractor;
use crate::engine::InferenceEngine;
use crate::errors::{NcError, Result};
use crate::imaging::{ImageLoader, PatchTransform};
use crate::types::{InputShape, PatchLevel};

/// Extraction over a pool of identical engine handles.
#[derive(Debug)]
pub struct ParallelExtractionPipeline<E> {
    engines: Vec<E>,
    loader: Arc<dyn ImageLoader>,
    transform: Arc<dyn PatchTransform>,
}

impl<E: InferenceEngine> ParallelExtractionPipeline<E> {
    /// Create a pipeline from one or more handles sharing an input shape.
    pub fn new(
        engines: Vec<E>,
        loader: Arc<dyn ImageLoader>,
        transform: Arc<dyn PatchTransform>,
    ) -> Result<Self> {
        let shape = engines
            .first()
            .map(|e| e.input_shape())
            .ok_or_else(|| NcError::invalid("parallel pipeline needs at least one engine"))?;
        if engines.iter().any(|e| e.input_shape() != shape) {
            return Err(NcError::invalid("engine handles disagree on input shape"));
        }
        Ok(Self { engines, loader, transform })
    }

    /// Number of engine handles (workers).
    pub fn workers(&self) -> usize {
        self.engines.len()
    }

    fn prepare(&self, images: &[PathBuf], levels: &[PatchLevel]) -> Result<Vec<Array3<f32>>> {
        let shape = self.input_shape();
        let loader = self.loader.as_ref();
        let transform = self.transform.as_ref();
        let per_image: Vec<Vec<Array3<f32>>> = images
            .par_iter()
            .map(|path| {
                let image = loader.load(path)?;
                image_patches(&image, levels)?
                    .iter()
                    .map(|patch| transform.preprocess(&image.crop(patch), shape))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(per_image.into_iter().flatten().collect())
    }
}

impl<E: InferenceEngine> CodeExtractor for ParallelExtractionPipeline<E> {
    fn input_shape(&self) -> InputShape {
        self.engines[0].input_shape()
    }

    fn code_dim(&self, layer: &str) -> Result<usize> {
        self.engines[0].layer_dim(layer)
    }

    fn extract_levels(
        &mut self,
        images: &[PathBuf],
        levels: &[PatchLevel],
        layer: &str,
    ) -> Result<Array2<f32>> {
        let plan = ExtractionPlan::new(images.len(), levels, layer, |l| self.code_dim(l))?;
        info!(
            "Extracting {} images at levels {:?} from layer '{}' on {} workers",
            images.len(),
            levels,
            layer,
            self.engines.len()
        );

        let tensors = self.prepare(images, levels)?;
        let per_worker = (tensors.len() + self.engines.len() - 1) / self.engines.len();
        let dim = plan.dim;

        let slices: Vec<Vec<Array1<f32>>> = tensors
            .par_chunks(per_worker.max(1))
            .zip(self.engines.par_iter_mut())
            .map(|(slice, engine)| {
                slice
                    .iter()
                    .map(|tensor| run_patch(engine, tensor.view(), layer, dim))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut codes = Array2::zeros((plan.dim, plan.columns));
        for (column, code) in slices.iter().flatten().enumerate() {
            codes.column_mut(column).assign(code);
        }
        Ok(codes)
    }
}
