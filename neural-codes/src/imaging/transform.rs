//! Per-patch preprocessing into engine input tensors.

use std::fmt;
use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::Rgb32FImage;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::config::TransformConfig;
use crate::errors::{NcError, Result};
use crate::npy;
use crate::types::InputShape;

/// Turns cropped patch pixels into a tensor matching the engine input.
pub trait PatchTransform: fmt::Debug + Send + Sync {
    /// Preprocess one patch into a `shape`-sized CHW tensor.
    fn preprocess(&self, patch: &Rgb32FImage, shape: InputShape) -> Result<Array3<f32>>;
}

/// Source of the mean subtracted from every pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanSource {
    /// Nothing subtracted.
    None,
    /// One constant per output channel.
    Channels([f32; 3]),
    /// CHW mean image in a `.npy` file, averaged per channel.
    Npy(PathBuf),
}

impl MeanSource {
    /// Resolve to one value per output channel.
    pub fn resolve(&self) -> Result<[f32; 3]> {
        match self {
            MeanSource::None => Ok([0.0; 3]),
            MeanSource::Channels(m) => Ok(*m),
            MeanSource::Npy(path) => {
                let mean: Array3<f32> = npy::read_f32(path)?;
                if mean.dim().0 != 3 {
                    return Err(NcError::invalid(format!(
                        "mean image {} must be CHW with 3 channels, got {:?}",
                        path.display(),
                        mean.dim()
                    )));
                }
                let per_channel = mean
                    .mean_axis(Axis(2))
                    .and_then(|m| m.mean_axis(Axis(1)))
                    .ok_or_else(|| NcError::invalid("mean image has no pixels"))?;
                Ok([per_channel[0], per_channel[1], per_channel[2]])
            }
        }
    }
}

/// Caffe-style preprocessing: resize, HWC to CHW, channel swap, raw scale,
/// mean subtraction.
#[derive(Debug, Clone, PartialEq)]
pub struct CaffeTransform {
    channel_swap: [usize; 3],
    raw_scale: f32,
    mean: [f32; 3],
}

impl Default for CaffeTransform {
    fn default() -> Self {
        Self {
            channel_swap: [0, 1, 2],
            raw_scale: 1.0,
            mean: [0.0; 3],
        }
    }
}

impl CaffeTransform {
    /// Build a transform from explicit parameters.
    pub fn new(channel_swap: [usize; 3], raw_scale: f32, mean: [f32; 3]) -> Result<Self> {
        if channel_swap.iter().any(|&c| c > 2) {
            return Err(NcError::invalid(format!("bad channel swap {:?}", channel_swap)));
        }
        Ok(Self { channel_swap, raw_scale, mean })
    }

    /// Build a transform from configuration, reading the mean file if any.
    pub fn from_config(config: &TransformConfig) -> Result<Self> {
        Self::new(config.channel_swap, config.raw_scale, config.mean.resolve()?)
    }
}

impl PatchTransform for CaffeTransform {
    fn preprocess(&self, patch: &Rgb32FImage, shape: InputShape) -> Result<Array3<f32>> {
        if shape.channels != 3 {
            return Err(NcError::invalid(format!(
                "RGB patches cannot feed a {}-channel input",
                shape.channels
            )));
        }
        let (h, w) = (shape.height as u32, shape.width as u32);

        // Zero-area patches come from degenerate grids; they map to the
        // transformed black image.
        if patch.width() == 0 || patch.height() == 0 {
            return Ok(Array3::from_shape_fn(shape.dim(), |(c, _, _)| -self.mean[c]));
        }

        let resized;
        let pixels = if patch.dimensions() == (w, h) {
            patch
        } else {
            resized = imageops::resize(patch, w, h, FilterType::Triangle);
            &resized
        };

        Ok(Array3::from_shape_fn(shape.dim(), |(c, y, x)| {
            let p = pixels.get_pixel(x as u32, y as u32);
            p.0[self.channel_swap[c]] * self.raw_scale - self.mean[c]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray_npy::WriteNpyExt;
    use std::fs::File;

    const SHAPE: InputShape = InputShape { channels: 3, height: 4, width: 4 };

    fn solid(w: u32, h: u32, rgb: [f32; 3]) -> Rgb32FImage {
        Rgb32FImage::from_pixel(w, h, Rgb(rgb))
    }

    #[test]
    fn test_swap_scale_mean() {
        let t = CaffeTransform::new([2, 1, 0], 255.0, [10.0, 20.0, 30.0]).unwrap();
        let out = t.preprocess(&solid(4, 4, [1.0, 0.5, 0.0]), SHAPE).unwrap();
        assert_eq!(out.dim(), (3, 4, 4));
        // channel 0 is blue (0.0), channel 2 is red (1.0)
        assert_eq!(out[[0, 0, 0]], -10.0);
        assert_eq!(out[[1, 2, 3]], 127.5 - 20.0);
        assert_eq!(out[[2, 3, 3]], 255.0 - 30.0);
    }

    #[test]
    fn test_resize_to_input() {
        let t = CaffeTransform::default();
        let out = t.preprocess(&solid(17, 9, [0.25, 0.25, 0.25]), SHAPE).unwrap();
        assert_eq!(out.dim(), (3, 4, 4));
        assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-5));
    }

    #[test]
    fn test_empty_patch_is_degenerate_not_error() {
        let t = CaffeTransform::new([0, 1, 2], 255.0, [1.0, 2.0, 3.0]).unwrap();
        let out = t.preprocess(&Rgb32FImage::new(0, 5), SHAPE).unwrap();
        assert_eq!(out[[0, 0, 0]], -1.0);
        assert_eq!(out[[2, 3, 3]], -3.0);
    }

    #[test]
    fn test_rejects_non_rgb_input() {
        let shape = InputShape { channels: 1, height: 4, width: 4 };
        let err = CaffeTransform::default().preprocess(&solid(4, 4, [0.0; 3]), shape);
        assert!(matches!(err, Err(NcError::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_channel_swap() {
        assert!(CaffeTransform::new([0, 1, 3], 1.0, [0.0; 3]).is_err());
    }

    #[test]
    fn test_npy_mean_reduced_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mean.npy");
        let mean = Array3::from_shape_fn((3, 2, 2), |(c, y, _)| (c * 10 + y) as f32);
        mean.write_npy(File::create(&path).unwrap()).unwrap();

        let resolved = MeanSource::Npy(path).resolve().unwrap();
        assert_eq!(resolved, [0.5, 10.5, 20.5]);
    }

    #[test]
    fn test_f64_mean_image() {
        // numpy saves float64 unless told otherwise.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mean_f64.npy");
        let mean = Array3::from_shape_fn((3, 4, 4), |(c, _, x)| 100.0 + c as f64 + x as f64 * 0.5);
        mean.write_npy(File::create(&path).unwrap()).unwrap();

        let resolved = MeanSource::Npy(path).resolve().unwrap();
        assert_eq!(resolved, [100.75, 101.75, 102.75]);
    }
}
