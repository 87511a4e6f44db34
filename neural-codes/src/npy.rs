//! `.npy` loading for weights and mean images.

use std::fs::File;
use std::path::Path;

use ndarray::{Array, Dimension};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use tracing::debug;

use crate::errors::Result;

/// Read an `.npy` array as f32. Float64 files (numpy's default dtype) are
/// narrowed to f32.
pub(crate) fn read_f32<D: Dimension>(path: &Path) -> Result<Array<f32, D>> {
    match Array::<f32, D>::read_npy(File::open(path)?) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(descr)) => {
            debug!("{} is {:?}, reading as f64", path.display(), descr);
            let wide = Array::<f64, D>::read_npy(File::open(path)?)?;
            Ok(wide.mapv(|v| v as f32))
        }
        Err(e) => Err(e.into()),
    }
}
