//! Error types for neural-codes.

use thiserror::Error;

/// Top-level error type for extraction, persistence and retrieval.
#[derive(Debug, Error)]
pub enum NcError {
    /// A caller passed arguments of the wrong shape or kind.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Inference engine loading or forward pass failures.
    #[error("engine error: {0}")]
    Engine(String),

    /// Neural code store is malformed or inconsistent.
    #[error("store error: {0}")]
    Store(String),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Array reshape error.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// `.npy` read error (weights, mean images).
    #[error("npy error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    /// I/O errors propagate untranslated.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serde serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for neural-codes operations.
pub type Result<T> = std::result::Result<T, NcError>;

impl NcError {
    /// Shorthand for an [`NcError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
