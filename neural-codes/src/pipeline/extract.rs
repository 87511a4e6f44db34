//! Orchestrates: image -> patch grids -> transform -> engine -> code matrix.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView3};
use tracing::{debug, info};

use super::CodeExtractor;
use crate::engine::InferenceEngine;
use crate::errors::{NcError, Result};
use crate::grid::patch_grid;
use crate::imaging::{DecodedImage, ImageLoader, PatchTransform};
use crate::types::{patches_per_image, InputShape, PatchBox, PatchLevel};

/// Sequential extraction: one forward pass per patch, in generation order.
///
/// The pipeline owns its engine, so no other caller can interleave a forward
/// pass with ours.
#[derive(Debug)]
pub struct FeatureExtractionPipeline<E> {
    engine: E,
    loader: Arc<dyn ImageLoader>,
    transform: Arc<dyn PatchTransform>,
}

impl<E: InferenceEngine> FeatureExtractionPipeline<E> {
    /// Create a pipeline around an engine handle.
    pub fn new(engine: E, loader: Arc<dyn ImageLoader>, transform: Arc<dyn PatchTransform>) -> Self {
        Self { engine, loader, transform }
    }

    /// Codes of an already decoded image at every level in `levels`.
    pub fn extract_decoded(
        &mut self,
        image: &DecodedImage,
        levels: &[PatchLevel],
        layer: &str,
    ) -> Result<Array2<f32>> {
        let plan = ExtractionPlan::new(1, levels, layer, |l| self.engine.layer_dim(l))?;
        let mut codes = Array2::zeros((plan.dim, plan.columns));
        self.encode_image(image, levels, layer, &plan, &mut codes, 0)?;
        Ok(codes)
    }

    fn encode_image(
        &mut self,
        image: &DecodedImage,
        levels: &[PatchLevel],
        layer: &str,
        plan: &ExtractionPlan,
        codes: &mut Array2<f32>,
        first_column: usize,
    ) -> Result<()> {
        let shape = self.engine.input_shape();
        let boxes = image_patches(image, levels)?;
        for (offset, patch) in boxes.iter().enumerate() {
            let tensor = self.transform.preprocess(&image.crop(patch), shape)?;
            let code = run_patch(&mut self.engine, tensor.view(), layer, plan.dim)?;
            codes.column_mut(first_column + offset).assign(&code);
        }
        debug!("Encoded {} patches of {}", boxes.len(), image.path().display());
        Ok(())
    }
}

impl<E: InferenceEngine> CodeExtractor for FeatureExtractionPipeline<E> {
    fn input_shape(&self) -> InputShape {
        self.engine.input_shape()
    }

    fn code_dim(&self, layer: &str) -> Result<usize> {
        self.engine.layer_dim(layer)
    }

    fn extract_levels(
        &mut self,
        images: &[PathBuf],
        levels: &[PatchLevel],
        layer: &str,
    ) -> Result<Array2<f32>> {
        let plan = ExtractionPlan::new(images.len(), levels, layer, |l| self.engine.layer_dim(l))?;
        info!(
            "Extracting {} images at levels {:?} from layer '{}' ({} codes)",
            images.len(),
            levels,
            layer,
            plan.columns
        );

        let mut codes = Array2::zeros((plan.dim, plan.columns));
        for (i, path) in images.iter().enumerate() {
            let image = self.loader.load(path)?;
            self.encode_image(&image, levels, layer, &plan, &mut codes, i * plan.per_image)?;
        }
        Ok(codes)
    }
}

/// Validated sizes of one extraction call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtractionPlan {
    pub(crate) dim: usize,
    pub(crate) per_image: usize,
    pub(crate) columns: usize,
}

impl ExtractionPlan {
    pub(crate) fn new(
        n_images: usize,
        levels: &[PatchLevel],
        layer: &str,
        layer_dim: impl Fn(&str) -> Result<usize>,
    ) -> Result<Self> {
        if n_images == 0 {
            return Err(NcError::invalid("no images to extract"));
        }
        if levels.is_empty() {
            return Err(NcError::invalid("no patch levels requested"));
        }
        if layer.is_empty() {
            return Err(NcError::invalid("layer name is empty"));
        }
        let dim = layer_dim(layer)?;
        let per_image = patches_per_image(levels);
        Ok(Self {
            dim,
            per_image,
            columns: n_images * per_image,
        })
    }
}

/// All patch boxes of `image`, level by level, each grid row-major.
pub(crate) fn image_patches(image: &DecodedImage, levels: &[PatchLevel]) -> Result<Vec<PatchBox>> {
    let mut boxes = Vec::with_capacity(patches_per_image(levels));
    for &level in levels {
        let grid = patch_grid(image.height(), image.width(), level)?;
        boxes.extend_from_slice(grid.boxes());
    }
    Ok(boxes)
}

/// One forward pass: feed `tensor`, read `layer`.
pub(crate) fn run_patch<E: InferenceEngine + ?Sized>(
    engine: &mut E,
    tensor: ArrayView3<'_, f32>,
    layer: &str,
    dim: usize,
) -> Result<Array1<f32>> {
    engine.set_input(tensor)?;
    engine.forward()?;
    let output = engine.layer_output(layer)?;
    if output.len() != dim {
        return Err(NcError::Engine(format!(
            "layer '{}' produced {} values, expected {}",
            layer,
            output.len(),
            dim
        )));
    }
    Ok(output.to_owned())
}
