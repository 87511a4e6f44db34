//! Pairwise distance between code matrices.

use std::fmt;

use ndarray::{Array2, ArrayView2, Axis};

use crate::errors::{NcError, Result};

/// Distance between every column of `a` (D x Na) and every column of
/// `b` (D x Nb), as an Na x Nb table.
pub trait PairwiseDistance: fmt::Debug + Send + Sync {
    /// Compute the full table.
    fn pairwise(&self, a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>>;
}

/// Squared Euclidean distance, `|a|² + |b|² - 2 a.b`, clamped at zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct SquaredEuclidean;

impl PairwiseDistance for SquaredEuclidean {
    fn pairwise(&self, a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if a.nrows() != b.nrows() {
            return Err(NcError::invalid(format!(
                "code lengths differ: {} vs {}",
                a.nrows(),
                b.nrows()
            )));
        }
        let a_sq = a.map_axis(Axis(0), |c| c.dot(&c));
        let b_sq = b.map_axis(Axis(0), |c| c.dot(&c));

        let mut table = a.t().dot(&b) * -2.0;
        table += &a_sq.insert_axis(Axis(1));
        table += &b_sq.insert_axis(Axis(0));
        // Clamp rounding negatives; NaN passes through.
        table.mapv_inplace(|d| if d < 0.0 { 0.0 } else { d });
        Ok(table)
    }
}
