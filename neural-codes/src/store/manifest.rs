//! JSON sidecar describing a raw store.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{NcError, Result};
use crate::pipeline::PersistReport;
use crate::types::{patches_per_image, PatchLevel};

/// Element order of the raw data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLayout {
    /// Little-endian f32, one code after another.
    PatchMajorF32Le,
}

/// Everything a reader needs to interpret a raw store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Version of the neural-codes library.
    pub version: String,
    /// ISO 8601 timestamp of creation.
    pub created_at: String,
    /// Element layout.
    pub layout: StoreLayout,
    /// Engine layer the codes came from.
    pub layer: String,
    /// Code length D.
    pub dim: usize,
    /// Levels extracted per image, in column order.
    pub levels: Vec<PatchLevel>,
    /// Columns per image (`sum(l²)` over `levels`).
    pub patches_per_image: usize,
    /// Image file names, in store order.
    pub images: Vec<String>,
    /// Images written per chunk.
    pub chunk_images: Vec<usize>,
}

impl StoreManifest {
    /// Describe a finished persist run.
    pub fn new(layer: &str, levels: &[PatchLevel], images: &[String], report: &PersistReport) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            layout: StoreLayout::PatchMajorF32Le,
            layer: layer.to_string(),
            dim: report.dim,
            levels: levels.to_vec(),
            patches_per_image: patches_per_image(levels),
            images: images.to_vec(),
            chunk_images: report.chunk_images.clone(),
        }
    }

    /// Sidecar path for a store file: `<store>.json`.
    pub fn sidecar_path(store: &Path) -> PathBuf {
        let mut name = store.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Total codes the data file should hold.
    pub fn total_columns(&self) -> usize {
        self.images.len() * self.patches_per_image
    }

    /// Write the sidecar next to `store`.
    pub fn save(&self, store: &Path) -> Result<()> {
        let file = File::create(Self::sidecar_path(store))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read the sidecar of `store` and check it is self-consistent.
    pub fn load(store: &Path) -> Result<Self> {
        let file = File::open(Self::sidecar_path(store))?;
        let manifest: Self = serde_json::from_reader(file)?;
        if manifest.patches_per_image != patches_per_image(&manifest.levels) {
            return Err(NcError::Store(format!(
                "manifest claims {} patches per image, levels {:?} give {}",
                manifest.patches_per_image,
                manifest.levels,
                patches_per_image(&manifest.levels)
            )));
        }
        if manifest.chunk_images.iter().sum::<usize>() != manifest.images.len() {
            return Err(NcError::Store("chunk sizes do not add up to the image count".to_string()));
        }
        Ok(manifest)
    }
}
