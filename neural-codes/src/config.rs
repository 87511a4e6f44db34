//! Startup configuration for extraction, persistence and retrieval.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::imaging::MeanSource;
use crate::pipeline::{BudgetChunkSizer, ChunkSizer, FixedChunkSizer};
use crate::types::ComputeMode;

/// Default number of images (or reference images) processed per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default number of ranked neighbors returned.
pub const DEFAULT_TOP_K: usize = 10;

/// Configuration for neural code extraction and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NcConfig {
    /// Base directory of the reference image collection.
    pub imbase_path: PathBuf,
    /// Reference file names relative to `imbase_path`. When absent the
    /// directory is listed.
    pub imbase_files: Option<Vec<String>>,
    /// Engine layer whose activations are the neural codes.
    pub layer: String,
    /// Reference codes use levels `1..ref_max_level`.
    pub ref_max_level: u32,
    /// Query codes use levels `1..query_max_level`.
    pub query_max_level: u32,
    /// Accelerator or general-purpose processor.
    pub compute_mode: ComputeMode,
    /// Engine model files.
    pub model: ModelConfig,
    /// Per-patch preprocessing.
    pub transform: TransformConfig,
    /// Chunk sizing policy.
    pub chunking: ChunkPolicy,
    /// Memory budget handed to the chunk sizer, in bytes.
    pub memory_budget_bytes: usize,
    /// Number of ranked neighbors returned.
    pub top_k: usize,
    /// Engine handles used for extraction. 1 runs sequentially.
    pub workers: usize,
}

impl Default for NcConfig {
    fn default() -> Self {
        Self {
            imbase_path: PathBuf::from("images"),
            imbase_files: None,
            layer: "fc".to_string(),
            ref_max_level: 3,
            query_max_level: 3,
            compute_mode: ComputeMode::Cpu,
            model: ModelConfig::default(),
            transform: TransformConfig::default(),
            chunking: ChunkPolicy::default(),
            memory_budget_bytes: 256 * 1024 * 1024,
            top_k: DEFAULT_TOP_K,
            workers: 1,
        }
    }
}

impl NcConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    /// Build the configured chunk sizer.
    pub fn chunk_sizer(&self) -> Box<dyn ChunkSizer> {
        match self.chunking {
            ChunkPolicy::Fixed { size } => Box::new(FixedChunkSizer::new(size)),
            ChunkPolicy::Budget { max } => Box::new(BudgetChunkSizer::new(max)),
        }
    }
}

/// Model definition and weights for the inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// JSON model definition.
    pub definition: PathBuf,
    /// Optional `.npy` weights.
    pub weights: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            definition: PathBuf::from("model.json"),
            weights: None,
        }
    }
}

/// Patch preprocessing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Output channel `c` takes input channel `channel_swap[c]`.
    pub channel_swap: [usize; 3],
    /// Multiplier applied to [0, 1] pixels.
    pub raw_scale: f32,
    /// Mean subtracted after scaling, in output channel order.
    pub mean: MeanSource,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            channel_swap: [2, 1, 0],
            raw_scale: 255.0,
            mean: MeanSource::Channels([104.006_99, 116.668_77, 122.678_92]),
        }
    }
}

/// How many images go into one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Constant chunk size.
    Fixed {
        /// Images per chunk.
        size: usize,
    },
    /// Memory budget divided by the per-image footprint.
    Budget {
        /// Upper bound on images per chunk.
        max: usize,
    },
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::Fixed { size: DEFAULT_CHUNK_SIZE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NcConfig::default();
        assert_eq!(config.top_k, 10);
        assert_eq!(config.chunking, ChunkPolicy::Fixed { size: 10 });
        assert_eq!(config.chunk_sizer().chunk_size(1, 1), 10);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "imbase_path": "/data/holidays",
            "layer": "pool",
            "compute_mode": "gpu",
            "chunking": { "budget": { "max": 64 } },
            "transform": { "mean": "none" }
        }"#;
        let config: NcConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.imbase_path, PathBuf::from("/data/holidays"));
        assert_eq!(config.layer, "pool");
        assert_eq!(config.compute_mode, ComputeMode::Gpu);
        assert_eq!(config.chunking, ChunkPolicy::Budget { max: 64 });
        assert!(matches!(config.transform.mean, MeanSource::None));
        assert_eq!(config.transform.raw_scale, 255.0);
        assert_eq!(config.ref_max_level, 3);
    }
}
