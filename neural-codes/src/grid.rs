//! Dense overlapping patch grids.
//!
//! At level `l` each side is cut into windows spanning `2 / (l + 1)` of its
//! length, consecutive windows overlapping by half a window.

use crate::errors::{NcError, Result};
use crate::types::{PatchBox, PatchLevel};

/// Ordered patches of one image at one level (row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGrid {
    level: PatchLevel,
    boxes: Vec<PatchBox>,
}

impl PatchGrid {
    /// Level this grid was generated for.
    pub fn level(&self) -> PatchLevel {
        self.level
    }

    /// Number of patches (`level²`).
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Always false for a generated grid.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Patches in generation order.
    pub fn iter(&self) -> std::slice::Iter<'_, PatchBox> {
        self.boxes.iter()
    }

    /// Patches as a slice.
    pub fn boxes(&self) -> &[PatchBox] {
        &self.boxes
    }
}

impl<'a> IntoIterator for &'a PatchGrid {
    type Item = &'a PatchBox;
    type IntoIter = std::slice::Iter<'a, PatchBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}

/// Generate the patch grid for an image of `height x width` pixels.
///
/// Outer loop over the vertical index, inner over the horizontal one.
/// Boundaries round half away from zero, so small images get off-by-one
/// patch sizes.
pub fn patch_grid(height: u32, width: u32, level: PatchLevel) -> Result<PatchGrid> {
    if height == 0 || width == 0 {
        return Err(NcError::invalid(format!(
            "image dimensions must be positive, got {}x{}",
            height, width
        )));
    }

    let l = level.get();
    let rows: Vec<(u32, u32)> = (1..=l).map(|i| window(i, l, height)).collect();
    let cols: Vec<(u32, u32)> = (1..=l).map(|j| window(j, l, width)).collect();

    let mut boxes = Vec::with_capacity(level.patch_count());
    for &(row_lo, row_hi) in &rows {
        for &(col_lo, col_hi) in &cols {
            boxes.push(PatchBox::new(row_lo, row_hi, col_lo, col_hi));
        }
    }

    Ok(PatchGrid { level, boxes })
}

/// Bounds of window `index` (1-based) along a side of `extent` pixels.
fn window(index: u32, level: u32, extent: u32) -> (u32, u32) {
    let denom = f64::from(level + 1);
    let extent = f64::from(extent);
    let lo = (f64::from(index - 1) / denom * extent).round();
    let hi = (f64::from(index + 1) / denom * extent).round();
    (lo as u32, hi as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(l: u32) -> PatchLevel {
        PatchLevel::new(l).unwrap()
    }

    #[test]
    fn test_level_one_covers_image() {
        let grid = patch_grid(37, 91, level(1)).unwrap();
        assert_eq!(grid.boxes(), &[PatchBox::new(0, 37, 0, 91)]);
    }

    #[test]
    fn test_level_two_square() {
        let grid = patch_grid(90, 90, level(2)).unwrap();
        assert_eq!(
            grid.boxes(),
            &[
                PatchBox::new(0, 60, 0, 60),
                PatchBox::new(0, 60, 30, 90),
                PatchBox::new(30, 90, 0, 60),
                PatchBox::new(30, 90, 30, 90),
            ]
        );
    }

    #[test]
    fn test_round_half_away_from_zero() {
        // 10 * 1/4 = 2.5 -> 3, 10 * 3/4 = 7.5 -> 8
        let grid = patch_grid(10, 10, level(3)).unwrap();
        let rows: Vec<(u32, u32)> = grid.iter().step_by(3).map(|b| (b.row_lo, b.row_hi)).collect();
        assert_eq!(rows, vec![(0, 5), (3, 8), (5, 10)]);
        let cols: Vec<(u32, u32)> = grid.iter().take(3).map(|b| (b.col_lo, b.col_hi)).collect();
        assert_eq!(cols, vec![(0, 5), (3, 8), (5, 10)]);
    }

    #[test]
    fn test_row_major_order() {
        let grid = patch_grid(40, 80, level(3)).unwrap();
        for pair in grid.boxes().windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.row_lo < b.row_lo || (a.row_lo == b.row_lo && a.col_lo < b.col_lo));
        }
    }

    #[test]
    fn test_bounds_hold_for_many_shapes() {
        for h in [1u32, 2, 3, 7, 64, 227, 1000] {
            for w in [1u32, 5, 13, 256] {
                for l in 1..=6 {
                    let grid = patch_grid(h, w, level(l)).unwrap();
                    assert_eq!(grid.len(), (l * l) as usize);
                    for b in &grid {
                        assert!(b.row_lo <= b.row_hi && b.row_hi <= h);
                        assert!(b.col_lo <= b.col_hi && b.col_hi <= w);
                    }
                }
            }
        }
    }

    #[test]
    fn test_degenerate_patches_allowed() {
        // A 1-pixel image at a high level yields empty patches, not an error.
        let grid = patch_grid(1, 1, level(5)).unwrap();
        assert!(grid.iter().any(|b| b.is_empty()));
    }

    #[test]
    fn test_highest_level_stays_in_bounds() {
        let grid = patch_grid(3, 2, level(PatchLevel::MAX)).unwrap();
        assert_eq!(grid.level(), level(PatchLevel::MAX));
        assert_eq!(grid.len(), 1024 * 1024);
        let last = grid.boxes()[grid.len() - 1];
        assert!(last.row_hi <= 3 && last.col_hi <= 2);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(patch_grid(0, 10, level(1)), Err(NcError::InvalidArgument(_))));
        assert!(matches!(patch_grid(10, 0, level(1)), Err(NcError::InvalidArgument(_))));
    }
}
