//! Image decoding and per-patch preprocessing.

pub mod loader;
pub mod transform;

pub use loader::{list_images, DecodedImage, FileImageLoader, ImageLoader};
pub use transform::{CaffeTransform, MeanSource, PatchTransform};
