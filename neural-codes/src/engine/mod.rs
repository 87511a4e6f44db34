//! Inference engine seam.
//!
//! An engine has a fixed input shape, one activation buffer per named layer,
//! and runs one forward pass at a time. Every mutating call takes `&mut self`,
//! so a handle can only be driven by one caller.

pub mod projection;

use ndarray::{ArrayView1, ArrayView3};

use crate::errors::{NcError, Result};
use crate::types::{ComputeMode, InputShape};

pub use projection::{EngineDefinition, ProjectionEngine};

/// Opaque inference engine producing per-layer activation vectors.
pub trait InferenceEngine: Send {
    /// Input tensor shape (CHW) fixed when the engine was loaded.
    fn input_shape(&self) -> InputShape;

    /// Where this handle runs.
    fn compute_mode(&self) -> ComputeMode;

    /// Length of the activation vector of `layer`.
    fn layer_dim(&self, layer: &str) -> Result<usize>;

    /// Copy `tensor` into the input buffer.
    fn set_input(&mut self, tensor: ArrayView3<'_, f32>) -> Result<()>;

    /// Run a forward pass over the current input, populating every layer.
    fn forward(&mut self) -> Result<()>;

    /// Activation vector of `layer` from the last forward pass.
    fn layer_output(&self, layer: &str) -> Result<ArrayView1<'_, f32>>;
}

/// Fail with `InvalidArgument` unless `tensor` matches the engine input.
pub(crate) fn check_input(shape: InputShape, tensor: &ArrayView3<'_, f32>) -> Result<()> {
    if tensor.dim() != shape.dim() {
        return Err(NcError::invalid(format!(
            "input tensor shape {:?} does not match engine input {:?}",
            tensor.dim(),
            shape.dim()
        )));
    }
    Ok(())
}
