//! Nearest-neighbor image retrieval over multi-scale neural codes.

pub mod aggregate;
pub mod distance;

use std::path::{Path, PathBuf};

use ndarray::{s, Array1, ArrayView2};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DEFAULT_TOP_K;
use crate::errors::{NcError, Result};
use crate::pipeline::{chunk_ranges, image_footprint, ChunkSizer, CodeExtractor};
use crate::types::{patches_per_image, PatchLevel};

pub use aggregate::aggregate;
pub use distance::{PairwiseDistance, SquaredEuclidean};

/// One ranked reference image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Position of the image in the reference collection.
    pub index: usize,
    /// Aggregated distance to the query.
    pub distance: f32,
}

/// Reference images ordered by ascending aggregated distance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Closest first.
    pub neighbors: Vec<Neighbor>,
}

impl RankedResult {
    /// Rank per-image distances, keeping the `top_k` closest. Ties keep
    /// collection order; NaN distances sort last.
    pub fn from_scores(scores: &Array1<f32>, top_k: usize) -> Self {
        let mut neighbors: Vec<Neighbor> = scores
            .iter()
            .enumerate()
            .map(|(index, &distance)| Neighbor { index, distance })
            .collect();
        neighbors.sort_by_key(|n| OrderedFloat(n.distance));
        neighbors.truncate(top_k.min(scores.len()));
        Self { neighbors }
    }

    /// Number of neighbors.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// True when nothing was ranked.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Neighbors, closest first.
    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.neighbors.iter()
    }
}

/// Scores reference images against a query with min-then-mean aggregation.
///
/// Reference codes are handled a chunk of images at a time so that only one
/// chunk's distance table exists at once.
#[derive(Debug)]
pub struct DistanceAggregator<'a> {
    metric: &'a dyn PairwiseDistance,
    sizer: &'a dyn ChunkSizer,
    memory_budget: usize,
    top_k: usize,
}

impl<'a> DistanceAggregator<'a> {
    /// Create an aggregator returning the default 10 neighbors.
    pub fn new(metric: &'a dyn PairwiseDistance, sizer: &'a dyn ChunkSizer, memory_budget: usize) -> Self {
        Self {
            metric,
            sizer,
            memory_budget,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Return at most `top_k` neighbors.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    fn chunk_size(&self, dim: usize, query_patches: usize, patches_per_ref: usize) -> usize {
        // Per reference image: its codes plus its slice of the distance table.
        let footprint = (patches_per_ref * (dim + query_patches)) * std::mem::size_of::<f32>();
        self.sizer.chunk_size(footprint, self.memory_budget).max(1)
    }

    /// Aggregated distance of every reference image.
    ///
    /// `query_codes` is D x Q, `ref_codes` is D x (N * `patches_per_ref`)
    /// with each image's columns contiguous.
    pub fn scores(
        &self,
        query_codes: ArrayView2<'_, f32>,
        ref_codes: ArrayView2<'_, f32>,
        patches_per_ref: usize,
    ) -> Result<Array1<f32>> {
        if query_codes.nrows() != ref_codes.nrows() {
            return Err(NcError::invalid(format!(
                "query codes have length {}, reference codes {}",
                query_codes.nrows(),
                ref_codes.nrows()
            )));
        }
        if patches_per_ref == 0 || ref_codes.ncols() % patches_per_ref != 0 {
            return Err(NcError::invalid(format!(
                "{} reference codes do not split into images of {} patches",
                ref_codes.ncols(),
                patches_per_ref
            )));
        }
        let n_images = ref_codes.ncols() / patches_per_ref;
        if n_images == 0 {
            return Err(NcError::invalid("no reference images"));
        }

        let chunk = self.chunk_size(query_codes.nrows(), query_codes.ncols(), patches_per_ref);
        let mut scores = Vec::with_capacity(n_images);
        for range in chunk_ranges(n_images, chunk) {
            let block = ref_codes.slice(s![.., range.start * patches_per_ref..range.end * patches_per_ref]);
            let table = self.metric.pairwise(query_codes, block)?;
            scores.extend(aggregate(table.view(), range.len(), patches_per_ref)?);
            debug!("Scored reference images {}..{}", range.start, range.end);
        }
        Ok(Array1::from(scores))
    }

    /// Rank precomputed reference codes against precomputed query codes.
    pub fn rank_codes(
        &self,
        query_codes: ArrayView2<'_, f32>,
        ref_codes: ArrayView2<'_, f32>,
        patches_per_ref: usize,
    ) -> Result<RankedResult> {
        let scores = self.scores(query_codes, ref_codes, patches_per_ref)?;
        Ok(RankedResult::from_scores(&scores, self.top_k))
    }

    /// Codes of the query image at levels `1..max_level_query`.
    pub fn query_codes<X: CodeExtractor + ?Sized>(
        &self,
        extractor: &mut X,
        query_image: &Path,
        layer: &str,
        max_level_query: u32,
    ) -> Result<ndarray::Array2<f32>> {
        let levels = PatchLevel::below(max_level_query)?;
        extractor.extract_levels(&[query_image.to_path_buf()], &levels, layer)
    }

    /// Rank reference images against a query image, extracting both.
    ///
    /// The query uses levels `1..max_level_query`, every reference image
    /// levels `1..max_level_ref`. References are extracted and scored one
    /// chunk at a time.
    pub fn rank<X: CodeExtractor + ?Sized>(
        &self,
        extractor: &mut X,
        query_image: &Path,
        reference_files: &[PathBuf],
        layer: &str,
        max_level_ref: u32,
        max_level_query: u32,
    ) -> Result<RankedResult> {
        if reference_files.is_empty() {
            return Err(NcError::invalid("no reference images"));
        }
        let ref_levels = PatchLevel::below(max_level_ref)?;
        let per_ref = patches_per_image(&ref_levels);
        let query_codes = self.query_codes(extractor, query_image, layer, max_level_query)?;

        let dim = query_codes.nrows();
        let budget_per_image = image_footprint(extractor.input_shape(), dim, per_ref);
        let chunk = self
            .sizer
            .chunk_size(budget_per_image, self.memory_budget)
            .max(1);

        info!(
            "Ranking {} reference images against {} ({} query patches, {} per reference)",
            reference_files.len(),
            query_image.display(),
            query_codes.ncols(),
            per_ref
        );

        let mut scores = Vec::with_capacity(reference_files.len());
        for range in chunk_ranges(reference_files.len(), chunk) {
            let ref_codes = extractor.extract_levels(&reference_files[range], &ref_levels, layer)?;
            scores.extend(self.scores(query_codes.view(), ref_codes.view(), per_ref)?);
        }

        Ok(RankedResult::from_scores(&Array1::from(scores), self.top_k))
    }
}
