//! Min-then-mean cross-scale aggregation.
//!
//! Rows of a distance table are the query image's patches (every scale).
//! Columns are reference patches grouped image-major: image `n` owns columns
//! `n * P .. (n + 1) * P`. A query patch scores an image by its best match
//! among that image's patches at any scale; the image's distance is the mean
//! of those best matches over all query patches.

use ndarray::{Array1, ArrayView2, Axis};

use crate::errors::{NcError, Result};

/// Aggregate a `Q x (n_images * patches_per_ref)` table into one distance
/// per reference image.
pub fn aggregate(
    table: ArrayView2<'_, f32>,
    n_images: usize,
    patches_per_ref: usize,
) -> Result<Array1<f32>> {
    let (query_patches, columns) = table.dim();
    if n_images == 0 || patches_per_ref == 0 || query_patches == 0 {
        return Err(NcError::invalid(format!(
            "empty aggregation: {} query patches, {} images, {} patches per image",
            query_patches, n_images, patches_per_ref
        )));
    }
    if columns != n_images * patches_per_ref {
        return Err(NcError::invalid(format!(
            "distance table has {} columns, expected {} images x {} patches",
            columns, n_images, patches_per_ref
        )));
    }

    let cube = table
        .as_standard_layout()
        .into_shape((query_patches, n_images, patches_per_ref))?
        .to_owned();
    // Any NaN distance makes its image's score NaN.
    let best = cube.map_axis(Axis(2), |patches| {
        patches.fold(f32::INFINITY, |m, &d| {
            if m.is_nan() || d.is_nan() {
                f32::NAN
            } else {
                m.min(d)
            }
        })
    });
    best.mean_axis(Axis(0))
        .ok_or_else(|| NcError::invalid("no query patches to average"))
}
