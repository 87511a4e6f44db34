//! Common core types shared by the grid, pipelines and search.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{NcError, Result};

/// Patch grid level. Level `l` tiles an image with `l * l` overlapping patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PatchLevel(u32);

impl PatchLevel {
    /// Highest accepted level. A grid at this level already holds about a
    /// million patches.
    pub const MAX: u32 = 1024;

    /// Validate a raw level. Level 0 and levels above [`PatchLevel::MAX`]
    /// are rejected.
    pub fn new(level: u32) -> Result<Self> {
        if level == 0 {
            return Err(NcError::invalid("patch level must be >= 1"));
        }
        if level > Self::MAX {
            return Err(NcError::invalid(format!(
                "patch level {} exceeds the maximum of {}",
                level,
                Self::MAX
            )));
        }
        Ok(Self(level))
    }

    /// Raw level value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of patches at this level (`level²`).
    pub fn patch_count(self) -> usize {
        let l = self.0 as usize;
        l * l
    }

    /// Levels `1..max_level` (exclusive upper bound).
    ///
    /// `max_level` must be at least 2 so that the range is non-empty.
    pub fn below(max_level: u32) -> Result<Vec<Self>> {
        if max_level < 2 {
            return Err(NcError::invalid(format!(
                "max patch level {} leaves no levels (need >= 2)",
                max_level
            )));
        }
        if max_level > Self::MAX + 1 {
            return Err(NcError::invalid(format!(
                "max patch level {} exceeds the maximum of {}",
                max_level,
                Self::MAX + 1
            )));
        }
        Ok((1..max_level).map(Self).collect())
    }
}

impl TryFrom<u32> for PatchLevel {
    type Error = NcError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PatchLevel> for u32 {
    fn from(level: PatchLevel) -> Self {
        level.0
    }
}

impl fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Total patches per image over a set of levels: `sum(l²)`.
///
/// This is the column count each image contributes to a multi-level
/// neural code matrix.
pub fn patches_per_image(levels: &[PatchLevel]) -> usize {
    levels.iter().map(|l| l.patch_count()).sum()
}

/// Legacy patch count for levels `1..max_level`: `(sum l)²`.
///
/// Only equal to [`patches_per_image`] when a single level is used
/// (`max_level == 2`). Kept so callers can detect stores sized with it.
pub fn triangular_patch_count(max_level: u32) -> usize {
    let triangle: usize = (1..max_level as usize).sum();
    triangle * triangle
}

/// Half-open pixel bounds of one patch: rows `row_lo..row_hi`, columns `col_lo..col_hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchBox {
    /// First row (inclusive).
    pub row_lo: u32,
    /// Last row (exclusive).
    pub row_hi: u32,
    /// First column (inclusive).
    pub col_lo: u32,
    /// Last column (exclusive).
    pub col_hi: u32,
}

impl PatchBox {
    /// Create a box from its bounds.
    pub fn new(row_lo: u32, row_hi: u32, col_lo: u32, col_hi: u32) -> Self {
        Self { row_lo, row_hi, col_lo, col_hi }
    }

    /// Patch height in pixels.
    pub fn height(&self) -> u32 {
        self.row_hi.saturating_sub(self.row_lo)
    }

    /// Patch width in pixels.
    pub fn width(&self) -> u32 {
        self.col_hi.saturating_sub(self.col_lo)
    }

    /// True when the patch covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }
}

/// Fixed input tensor shape of a loaded engine (CHW).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    /// Channel count.
    pub channels: usize,
    /// Input height.
    pub height: usize,
    /// Input width.
    pub width: usize,
}

impl InputShape {
    /// Number of f32 values in one input tensor.
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// True when any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape as an ndarray dimension tuple.
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

/// Where the engine runs. Chosen once, when the engine is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    /// General-purpose processor.
    #[default]
    Cpu,
    /// Accelerator.
    Gpu,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_zero_rejected() {
        assert!(matches!(PatchLevel::new(0), Err(NcError::InvalidArgument(_))));
        assert_eq!(PatchLevel::new(3).unwrap().patch_count(), 9);
    }

    #[test]
    fn test_level_upper_bound() {
        assert_eq!(PatchLevel::new(PatchLevel::MAX).unwrap().get(), 1024);
        assert!(matches!(PatchLevel::new(PatchLevel::MAX + 1), Err(NcError::InvalidArgument(_))));
        assert!(matches!(PatchLevel::new(u32::MAX), Err(NcError::InvalidArgument(_))));
        assert!(PatchLevel::below(u32::MAX).is_err());
        assert!(serde_json::from_str::<PatchLevel>("4294967295").is_err());
    }

    #[test]
    fn test_levels_below() {
        let levels = PatchLevel::below(4).unwrap();
        let raw: Vec<u32> = levels.iter().map(|l| l.get()).collect();
        assert_eq!(raw, vec![1, 2, 3]);
        assert!(PatchLevel::below(1).is_err());
    }

    #[test]
    fn test_patch_count_formulas() {
        // One level: both formulas give 1.
        assert_eq!(patches_per_image(&PatchLevel::below(2).unwrap()), 1);
        assert_eq!(triangular_patch_count(2), 1);

        // Levels 1..=2: 1 + 4 = 5 patches are extracted, the triangular
        // formula claims (1 + 2)² = 9.
        assert_eq!(patches_per_image(&PatchLevel::below(3).unwrap()), 5);
        assert_eq!(triangular_patch_count(3), 9);

        for max_level in 3..8 {
            let levels = PatchLevel::below(max_level).unwrap();
            assert!(patches_per_image(&levels) < triangular_patch_count(max_level));
        }
    }

    #[test]
    fn test_level_serde_validates() {
        let level: PatchLevel = serde_json::from_str("2").unwrap();
        assert_eq!(level.get(), 2);
        assert!(serde_json::from_str::<PatchLevel>("0").is_err());
    }

    #[test]
    fn test_compute_mode_serde() {
        let mode: ComputeMode = serde_json::from_str("\"gpu\"").unwrap();
        assert_eq!(mode, ComputeMode::Gpu);
        assert_eq!(ComputeMode::default(), ComputeMode::Cpu);
    }
}
