//! Deterministic projection engine.
//!
//! Two layers:
//! - `pool`: per-channel average over a `grid x grid` spatial partition
//! - `fc`: ReLU of a linear projection of `pool`
//!
//! Weights come from a `.npy` file or a seeded ChaCha stream, so identical
//! inputs always give bit-identical activations.

use std::fs::File;
use std::path::Path;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{check_input, InferenceEngine};
use crate::errors::{NcError, Result};
use crate::npy;
use crate::types::{ComputeMode, InputShape};

/// Name of the pooled layer.
pub const POOL_LAYER: &str = "pool";
/// Name of the projected layer.
pub const FC_LAYER: &str = "fc";

fn default_grid() -> usize {
    4
}

/// JSON model definition of a [`ProjectionEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDefinition {
    /// Input tensor shape.
    pub input: InputShape,
    /// Spatial pooling grid side.
    #[serde(default = "default_grid")]
    pub grid: usize,
    /// Output length of the `fc` layer.
    pub fc_dim: usize,
    /// Seed for generated weights.
    #[serde(default)]
    pub seed: u64,
}

impl EngineDefinition {
    /// Length of the `pool` layer.
    pub fn pool_dim(&self) -> usize {
        self.input.channels * self.grid * self.grid
    }

    fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(NcError::Engine(format!("empty input shape {:?}", self.input)));
        }
        if self.grid == 0 || self.grid > self.input.height || self.grid > self.input.width {
            return Err(NcError::Engine(format!(
                "pooling grid {} does not fit input {}x{}",
                self.grid, self.input.height, self.input.width
            )));
        }
        if self.fc_dim == 0 {
            return Err(NcError::Engine("fc_dim must be positive".to_string()));
        }
        Ok(())
    }
}

/// CPU projection engine.
#[derive(Debug, Clone)]
pub struct ProjectionEngine {
    definition: EngineDefinition,
    mode: ComputeMode,
    weights: Array2<f32>,
    input: Array3<f32>,
    pool: Array1<f32>,
    fc: Array1<f32>,
    has_run: bool,
}

impl ProjectionEngine {
    /// Build an engine with weights drawn from `definition.seed`.
    pub fn new(definition: EngineDefinition, mode: ComputeMode) -> Result<Self> {
        definition.validate()?;
        let (rows, cols) = (definition.fc_dim, definition.pool_dim());
        let scale = 1.0 / (cols as f32).sqrt();
        let mut rng = ChaCha8Rng::seed_from_u64(definition.seed);
        let weights = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-scale..scale));
        Self::with_weights(definition, weights, mode)
    }

    /// Build an engine with explicit `fc_dim x pool_dim` weights.
    pub fn with_weights(
        definition: EngineDefinition,
        weights: Array2<f32>,
        mode: ComputeMode,
    ) -> Result<Self> {
        definition.validate()?;
        let expected = (definition.fc_dim, definition.pool_dim());
        if weights.dim() != expected {
            return Err(NcError::Engine(format!(
                "weights shape {:?} does not match definition {:?}",
                weights.dim(),
                expected
            )));
        }

        let mode = match mode {
            ComputeMode::Gpu => {
                warn!("projection engine has no accelerator backend, running on cpu");
                ComputeMode::Cpu
            }
            ComputeMode::Cpu => ComputeMode::Cpu,
        };

        Ok(Self {
            input: Array3::zeros(definition.input.dim()),
            pool: Array1::zeros(definition.pool_dim()),
            fc: Array1::zeros(definition.fc_dim),
            definition,
            mode,
            weights,
            has_run: false,
        })
    }

    /// Load a JSON definition and optional `.npy` weights.
    pub fn load(definition: &Path, weights: Option<&Path>, mode: ComputeMode) -> Result<Self> {
        let def: EngineDefinition = serde_json::from_reader(File::open(definition)?)?;
        info!(
            "Loading projection engine from {} (input {:?}, fc_dim {})",
            definition.display(),
            def.input.dim(),
            def.fc_dim
        );
        match weights {
            Some(path) => {
                let w: Array2<f32> = npy::read_f32(path)?;
                Self::with_weights(def, w, mode)
            }
            None => Self::new(def, mode),
        }
    }

    fn pool_input(&mut self) {
        let g = self.definition.grid;
        let (channels, height, width) = self.input.dim();
        for c in 0..channels {
            for r in 0..g {
                let (r0, r1) = (r * height / g, (r + 1) * height / g);
                for q in 0..g {
                    let (q0, q1) = (q * width / g, (q + 1) * width / g);
                    let cell = self.input.slice(s![c, r0..r1, q0..q1]);
                    self.pool[c * g * g + r * g + q] = cell.mean().unwrap_or(0.0);
                }
            }
        }
    }
}

impl InferenceEngine for ProjectionEngine {
    fn input_shape(&self) -> InputShape {
        self.definition.input
    }

    fn compute_mode(&self) -> ComputeMode {
        self.mode
    }

    fn layer_dim(&self, layer: &str) -> Result<usize> {
        match layer {
            POOL_LAYER => Ok(self.definition.pool_dim()),
            FC_LAYER => Ok(self.definition.fc_dim),
            other => Err(NcError::invalid(format!("unknown layer '{}'", other))),
        }
    }

    fn set_input(&mut self, tensor: ArrayView3<'_, f32>) -> Result<()> {
        check_input(self.definition.input, &tensor)?;
        self.input.assign(&tensor);
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        self.pool_input();
        self.fc = self.weights.dot(&self.pool).mapv_into(|x| x.max(0.0));
        self.has_run = true;
        Ok(())
    }

    fn layer_output(&self, layer: &str) -> Result<ArrayView1<'_, f32>> {
        if !self.has_run {
            return Err(NcError::Engine("no forward pass has run".to_string()));
        }
        match layer {
            POOL_LAYER => Ok(self.pool.view()),
            FC_LAYER => Ok(self.fc.view()),
            other => Err(NcError::invalid(format!("unknown layer '{}'", other))),
        }
    }
}
