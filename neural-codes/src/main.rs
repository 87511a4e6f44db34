use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use neural_codes::{
    imaging::{list_images, CaffeTransform, FileImageLoader, ImageLoader, PatchTransform},
    search::SquaredEuclidean,
    store::read_codes,
    BatchedStoreWriter, CodeExtractor, DistanceAggregator, FeatureExtractionPipeline, NcConfig,
    NeuralCodeStore, ParallelExtractionPipeline, PatchLevel, ProjectionEngine, StoreManifest,
};

#[derive(Parser, Debug)]
#[command(name = "ncodes", about = "Multi-scale patch neural codes for image retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract and persist neural codes of a reference collection.
    Index {
        /// Path to config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output store file
        #[arg(long)]
        store: PathBuf,
    },

    /// Rank the stored reference images against a query image.
    Query {
        /// Path to config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Store written by `index`
        #[arg(long)]
        store: PathBuf,
        /// Query image
        #[arg(long)]
        image: PathBuf,
        /// Number of results to return
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print a store's manifest and size.
    Inspect {
        /// Store file
        #[arg(long)]
        store: PathBuf,
    },

    /// Print the patch boxes of one grid level.
    Grid {
        #[arg(long)]
        height: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        level: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { config, store } => cmd_index(load_config(config)?, store),
        Commands::Query { config, store, image, top_k } => {
            cmd_query(load_config(config)?, store, image, top_k)
        }
        Commands::Inspect { store } => cmd_inspect(store),
        Commands::Grid { height, width, level } => cmd_grid(height, width, level),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<NcConfig> {
    match path {
        Some(path) => NcConfig::from_file(&path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(NcConfig::default()),
    }
}

fn build_extractor(config: &NcConfig) -> anyhow::Result<Box<dyn CodeExtractor>> {
    let engine = ProjectionEngine::load(
        &config.model.definition,
        config.model.weights.as_deref(),
        config.compute_mode,
    )
    .with_context(|| format!("loading model {}", config.model.definition.display()))?;
    let loader: Arc<dyn ImageLoader> = Arc::new(FileImageLoader);
    let transform: Arc<dyn PatchTransform> = Arc::new(CaffeTransform::from_config(&config.transform)?);

    if config.workers > 1 {
        let engines = vec![engine; config.workers];
        let pipeline = ParallelExtractionPipeline::new(engines, loader, transform)?;
        info!("Extracting with {} engine handles", pipeline.workers());
        Ok(Box::new(pipeline))
    } else {
        Ok(Box::new(FeatureExtractionPipeline::new(engine, loader, transform)))
    }
}

fn cmd_index(config: NcConfig, store_path: PathBuf) -> anyhow::Result<()> {
    let files = match &config.imbase_files {
        Some(files) => files.clone(),
        None => list_images(&config.imbase_path)
            .with_context(|| format!("listing {}", config.imbase_path.display()))?,
    };
    if files.is_empty() {
        bail!("no reference images found in {}", config.imbase_path.display());
    }

    let levels = PatchLevel::below(config.ref_max_level)?;
    let mut extractor = build_extractor(&config)?;
    let sizer = config.chunk_sizer();
    let mut store = NeuralCodeStore::create(&store_path)?;

    let start = std::time::Instant::now();
    let report = BatchedStoreWriter::new(sizer.as_ref(), config.memory_budget_bytes).persist_levels(
        &mut store,
        &config.imbase_path,
        &files,
        extractor.as_mut(),
        &config.layer,
        &levels,
    )?;

    let manifest = StoreManifest::new(&config.layer, &levels, &files, &report);
    manifest.save(&store_path)?;

    println!(
        "Indexed {} images ({} codes of length {}) in {} chunks, {:.2?}",
        report.images,
        report.columns,
        report.dim,
        report.chunks(),
        start.elapsed()
    );
    println!("Store: {}", store_path.display());
    println!("Manifest: {}", StoreManifest::sidecar_path(&store_path).display());
    Ok(())
}

fn cmd_query(
    config: NcConfig,
    store_path: PathBuf,
    image: PathBuf,
    top_k: Option<usize>,
) -> anyhow::Result<()> {
    let manifest = StoreManifest::load(&store_path)
        .with_context(|| format!("reading manifest of {}", store_path.display()))?;
    let ref_codes = read_codes(&store_path, manifest.dim)?;
    if ref_codes.ncols() != manifest.total_columns() {
        bail!(
            "store holds {} codes, manifest expects {}",
            ref_codes.ncols(),
            manifest.total_columns()
        );
    }

    let mut extractor = build_extractor(&config)?;
    let metric = SquaredEuclidean;
    let sizer = config.chunk_sizer();
    let aggregator = DistanceAggregator::new(&metric, sizer.as_ref(), config.memory_budget_bytes)
        .with_top_k(top_k.unwrap_or(config.top_k));

    let query_codes =
        aggregator.query_codes(extractor.as_mut(), &image, &manifest.layer, config.query_max_level)?;
    let ranked = aggregator.rank_codes(query_codes.view(), ref_codes.view(), manifest.patches_per_image)?;

    println!("Query: {}", image.display());
    for (rank, neighbor) in ranked.iter().enumerate() {
        println!(
            "{:>3}. {:<40} {:.4}",
            rank + 1,
            manifest.images[neighbor.index],
            neighbor.distance
        );
    }
    Ok(())
}

fn cmd_inspect(store_path: PathBuf) -> anyhow::Result<()> {
    let manifest = StoreManifest::load(&store_path)
        .with_context(|| format!("reading manifest of {}", store_path.display()))?;
    let bytes = std::fs::metadata(&store_path)?.len();

    println!("Store: {}", store_path.display());
    println!("Created: {} (v{})", manifest.created_at, manifest.version);
    println!("Layout: {:?}", manifest.layout);
    println!("Layer: {} (dim {})", manifest.layer, manifest.dim);
    let levels: Vec<String> = manifest.levels.iter().map(|l| l.to_string()).collect();
    println!("Levels: {} ({} patches per image)", levels.join(", "), manifest.patches_per_image);
    println!("Images: {} in {} chunks", manifest.images.len(), manifest.chunk_images.len());
    println!("Codes: {} ({} bytes)", manifest.total_columns(), bytes);

    let expected = (manifest.total_columns() * manifest.dim * 4) as u64;
    if bytes != expected {
        println!("WARNING: expected {} bytes", expected);
    }
    Ok(())
}

fn cmd_grid(height: u32, width: u32, level: u32) -> anyhow::Result<()> {
    let grid = neural_codes::patch_grid(height, width, PatchLevel::new(level)?)?;
    println!("Level {} on {}x{}: {} patches", grid.level(), height, width, grid.len());
    for (i, b) in grid.iter().enumerate() {
        println!(
            "{:>3}: rows {}..{} cols {}..{} ({}x{})",
            i,
            b.row_lo,
            b.row_hi,
            b.col_lo,
            b.col_hi,
            b.height(),
            b.width()
        );
    }
    Ok(())
}
