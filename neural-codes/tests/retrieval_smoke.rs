use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use neural_codes::{
    imaging::{list_images, CaffeTransform, FileImageLoader, ImageLoader, PatchTransform},
    pipeline::FixedChunkSizer,
    search::SquaredEuclidean,
    store::read_codes,
    BatchedStoreWriter, CodeExtractor, DistanceAggregator, FeatureExtractionPipeline, NcConfig,
    NeuralCodeStore, PatchLevel, ProjectionEngine, StoreManifest,
};

/// Writes `n` visually distinct PNGs and a model definition into `dir`.
fn setup_collection(dir: &Path, n: u32) -> (PathBuf, Vec<String>) {
    let images = dir.join("images");
    std::fs::create_dir_all(&images).unwrap();
    for i in 0..n {
        let img = RgbImage::from_fn(24 + 2 * i, 30 - i % 5, |x, y| {
            Rgb([
                ((x * (i + 1) * 7 + y * 3) % 256) as u8,
                ((y * (i + 2) * 5 + x) % 256) as u8,
                ((i * 23 + x * y) % 256) as u8,
            ])
        });
        img.save(images.join(format!("img_{:02}.png", i))).unwrap();
    }

    let model = dir.join("model.json");
    std::fs::write(
        &model,
        r#"{ "input": { "channels": 3, "height": 12, "width": 12 }, "grid": 3, "fc_dim": 16, "seed": 11 }"#,
    )
    .unwrap();

    let files = list_images(&images).unwrap();
    assert_eq!(files.len(), n as usize);
    (model, files)
}

fn config(dir: &Path, model: PathBuf) -> NcConfig {
    let mut config = NcConfig::default();
    config.imbase_path = dir.join("images");
    config.model.definition = model;
    config.transform.mean = neural_codes::imaging::MeanSource::None;
    config.transform.raw_scale = 1.0;
    config
}

fn pipeline(config: &NcConfig) -> FeatureExtractionPipeline<ProjectionEngine> {
    let engine = ProjectionEngine::load(&config.model.definition, None, config.compute_mode).unwrap();
    let loader: Arc<dyn ImageLoader> = Arc::new(FileImageLoader);
    let transform: Arc<dyn PatchTransform> =
        Arc::new(CaffeTransform::from_config(&config.transform).unwrap());
    FeatureExtractionPipeline::new(engine, loader, transform)
}

#[test]
fn smoke_index_then_query_store() {
    let dir = tempfile::tempdir().unwrap();
    let (model, files) = setup_collection(dir.path(), 12);
    let config = config(dir.path(), model);
    let mut extractor = pipeline(&config);

    // 1. Persist in chunks of 5
    let levels = PatchLevel::below(config.ref_max_level).unwrap();
    let store_path = dir.path().join("codes.bin");
    let mut store = NeuralCodeStore::create(&store_path).unwrap();
    let sizer = FixedChunkSizer::new(5);
    let report = BatchedStoreWriter::new(&sizer, config.memory_budget_bytes)
        .persist_levels(&mut store, &config.imbase_path, &files, &mut extractor, &config.layer, &levels)
        .unwrap();
    drop(store);

    assert_eq!(report.chunk_images, vec![5, 5, 2]);
    assert_eq!(report.patches_per_image, 1 + 4);
    assert_eq!(report.columns, 12 * 5);

    StoreManifest::new(&config.layer, &levels, &files, &report)
        .save(&store_path)
        .unwrap();

    // 2. Read it back
    let manifest = StoreManifest::load(&store_path).unwrap();
    assert_eq!(manifest.dim, 16);
    let ref_codes = read_codes(&store_path, manifest.dim).unwrap();
    assert_eq!(ref_codes.ncols(), manifest.total_columns());

    // 3. Query with one of the references
    let metric = SquaredEuclidean;
    let agg_sizer = FixedChunkSizer::new(4);
    let aggregator = DistanceAggregator::new(&metric, &agg_sizer, config.memory_budget_bytes);
    let query_path = config.imbase_path.join(&files[7]);
    let query = aggregator
        .query_codes(&mut extractor, &query_path, &config.layer, config.query_max_level)
        .unwrap();
    let ranked = aggregator
        .rank_codes(query.view(), ref_codes.view(), manifest.patches_per_image)
        .unwrap();

    assert_eq!(ranked.len(), 10);
    assert_eq!(ranked.neighbors[0].index, 7, "query should find itself first");
    assert!(ranked.neighbors[0].distance < 1e-3);
    assert!(ranked.neighbors.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn smoke_rank_extracts_references_in_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (model, files) = setup_collection(dir.path(), 4);
    let config = config(dir.path(), model);
    let mut extractor = pipeline(&config);
    let paths: Vec<PathBuf> = files.iter().map(|f| config.imbase_path.join(f)).collect();

    let metric = SquaredEuclidean;
    let sizer = FixedChunkSizer::new(3);
    let aggregator = DistanceAggregator::new(&metric, &sizer, 0);
    let ranked = aggregator
        .rank(&mut extractor, &paths[2], &paths, &config.layer, 3, 3)
        .unwrap();

    // Fewer references than the default top-k.
    assert_eq!(ranked.len(), 4);
    assert_eq!(ranked.neighbors[0].index, 2);

    // Same ranking from precomputed codes.
    let levels = PatchLevel::below(3).unwrap();
    let refs = extractor.extract_levels(&paths, &levels, &config.layer).unwrap();
    let query = aggregator.query_codes(&mut extractor, &paths[2], &config.layer, 3).unwrap();
    let from_codes = aggregator.rank_codes(query.view(), refs.view(), 5).unwrap();

    for (a, b) in ranked.iter().zip(from_codes.iter()) {
        assert_eq!(a.index, b.index);
        assert!((a.distance - b.distance).abs() < 1e-3);
    }
}

#[test]
fn smoke_query_levels_differ_from_reference_levels() {
    let dir = tempfile::tempdir().unwrap();
    let (model, files) = setup_collection(dir.path(), 3);
    let config = config(dir.path(), model);
    let mut extractor = pipeline(&config);
    let paths: Vec<PathBuf> = files.iter().map(|f| config.imbase_path.join(f)).collect();

    let metric = SquaredEuclidean;
    let sizer = FixedChunkSizer::default();
    let aggregator = DistanceAggregator::new(&metric, &sizer, 0);

    // Query at levels 1..3 against references at levels 1..4.
    let query = aggregator.query_codes(&mut extractor, &paths[0], &config.layer, 3).unwrap();
    assert_eq!(query.ncols(), 1 + 4);
    let ranked = aggregator.rank(&mut extractor, &paths[0], &paths, &config.layer, 4, 3).unwrap();
    assert_eq!(ranked.len(), 3);
    // The query's own patches are a subset of its reference patches.
    assert_eq!(ranked.neighbors[0].index, 0);
    assert!(ranked.neighbors[0].distance < 1e-3);

    // max_level below 2 selects no levels.
    assert!(aggregator.rank(&mut extractor, &paths[0], &paths, &config.layer, 1, 3).is_err());
}
