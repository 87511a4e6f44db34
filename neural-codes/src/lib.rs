#![deny(missing_debug_implementations, rust_2018_idioms)]
#![warn(missing_docs)]

//! # neural-codes
//!
//! Multi-scale patch neural codes for nearest-neighbor image retrieval:
//! - dense overlapping patch grids at several levels per image
//! - one inference pass per patch, codes collected into a D x N matrix
//! - memory-bounded chunked persistence of a reference collection
//! - min-then-mean cross-scale distance aggregation and ranking
//!
//! The inference engine, image decoding, per-patch normalization and the
//! pairwise distance are traits; each ships with one implementation.

pub mod config;
pub mod errors;
pub mod grid;
mod npy;
pub mod types;
/// Inference engine abstraction and the projection engine.
pub mod engine;
/// Image decoding and per-patch preprocessing.
pub mod imaging;
/// Extraction and persistence pipelines.
pub mod pipeline;
/// Distance aggregation and ranking.
pub mod search;
/// Raw neural code store and its manifest.
pub mod store;

pub use config::NcConfig;
pub use engine::{InferenceEngine, ProjectionEngine};
pub use errors::{NcError, Result};
pub use grid::{patch_grid, PatchGrid};
pub use pipeline::{
    BatchedStoreWriter, ChunkSizer, CodeExtractor, FeatureExtractionPipeline,
    ParallelExtractionPipeline,
};
pub use search::{DistanceAggregator, Neighbor, RankedResult};
pub use store::{NeuralCodeStore, StoreManifest};
pub use types::{ComputeMode, InputShape, PatchBox, PatchLevel};
