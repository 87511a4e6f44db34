//! Image loading.

use std::fmt;
use std::path::{Path, PathBuf};

use image::{imageops, Rgb32FImage};

use crate::errors::Result;
use crate::types::PatchBox;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Decoded RGB image with pixels in `[0, 1]`.
#[derive(Clone)]
pub struct DecodedImage {
    path: PathBuf,
    pixels: Rgb32FImage,
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("path", &self.path)
            .field("height", &self.height())
            .field("width", &self.width())
            .finish()
    }
}

impl DecodedImage {
    /// Wrap already decoded pixels.
    pub fn new(path: impl Into<PathBuf>, pixels: Rgb32FImage) -> Self {
        Self { path: path.into(), pixels }
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Channel count. Decoding always yields RGB.
    pub fn channels(&self) -> usize {
        3
    }

    /// Raw pixels.
    pub fn pixels(&self) -> &Rgb32FImage {
        &self.pixels
    }

    /// Copy out the pixels of one patch.
    pub fn crop(&self, patch: &PatchBox) -> Rgb32FImage {
        imageops::crop_imm(
            &self.pixels,
            patch.col_lo,
            patch.row_lo,
            patch.width(),
            patch.height(),
        )
        .to_image()
    }
}

/// Decodes image files.
pub trait ImageLoader: fmt::Debug + Send + Sync {
    /// Load and decode the image at `path`.
    fn load(&self, path: &Path) -> Result<DecodedImage>;
}

/// Loader backed by the `image` crate. Grayscale and alpha images are
/// converted to RGB.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load(&self, path: &Path) -> Result<DecodedImage> {
        let pixels = image::open(path)?.to_rgb32f();
        Ok(DecodedImage::new(path, pixels))
    }
}

/// File names of the images directly inside `dir`, sorted.
pub fn list_images(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
