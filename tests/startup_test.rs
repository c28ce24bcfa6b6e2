mod helpers;

use imsearch::catalog;
use imsearch::config::ImsearchConfig;
use imsearch::index::flat::FlatIndex;
use imsearch::index::IndexEntry;
use imsearch::search::SearchEngine;

use helpers::mock_qdrant::MockQdrant;
use helpers::mock_triton::{MockTriton, INPUT_SIZE};
use helpers::{closed_port_url, item, png_bytes, spawn_server, DIM};

const COLLECTION: &str = "catalog";

fn path_string(path: std::path::PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn write_index(config: &ImsearchConfig, dimension: usize) {
    let entries = vec![IndexEntry {
        id: "a".into(),
        embedding: vec![0.5; dimension],
    }];
    FlatIndex::build(dimension, entries)
        .unwrap()
        .save(config.resolved_index_path())
        .unwrap();
}

fn write_catalog(config: &ImsearchConfig, dimension: usize) {
    let mut conn = catalog::open_catalog(config.resolved_catalog_path()).unwrap();
    catalog::replace_all(&mut conn, &[item("a")], &config.embedding.model, dimension).unwrap();
}

/// Remote embedder against a mock Triton, local index by default, Qdrant
/// collection of `collection_size`. Index file and catalog are built at `DIM`.
async fn setup(dir: &std::path::Path, collection_size: usize) -> ImsearchConfig {
    let triton = spawn_server(MockTriton::default().router()).await;
    let qdrant = spawn_server(
        MockQdrant::default()
            .with_collection(COLLECTION, collection_size)
            .router(),
    )
    .await;

    let mut config = ImsearchConfig::default();
    config.embedding.backend = "remote".into();
    config.embedding.dimension = DIM;
    config.embedding.input_size = INPUT_SIZE;
    config.embedding.model_path = path_string(dir.join("missing.onnx"));
    config.inference.url = triton;
    config.index.backend = "local".into();
    config.index.path = path_string(dir.join("index.bin"));
    config.catalog.db_path = path_string(dir.join("catalog.db"));
    config.qdrant.url = qdrant;
    config.qdrant.collection = COLLECTION.into();

    write_index(&config, DIM);
    write_catalog(&config, DIM);
    config
}

#[tokio::test]
async fn starts_and_serves_with_consistent_backends() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM).await;

    let engine = SearchEngine::start(&config).await.unwrap();
    let selector = engine.default_selector();
    let ranked = engine
        .search(&png_bytes(20, 12, [90, 30, 200]), 1, selector)
        .await
        .unwrap();
    assert_eq!(ranked.products[0].id, "a");
    engine.shutdown();
}

#[tokio::test]
async fn missing_optional_local_index_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = setup(tmp.path(), DIM).await;
    config.index.backend = "remote".into();
    std::fs::remove_file(config.resolved_index_path()).unwrap();

    assert!(SearchEngine::start(&config).await.is_ok());
}

#[tokio::test]
async fn missing_default_local_index_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM).await;
    std::fs::remove_file(config.resolved_index_path()).unwrap();

    assert!(SearchEngine::start(&config).await.is_err());
}

#[tokio::test]
async fn corrupt_index_file_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM).await;
    std::fs::write(config.resolved_index_path(), b"not an index").unwrap();

    assert!(SearchEngine::start(&config).await.is_err());
}

#[tokio::test]
async fn index_file_of_other_dimension_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM).await;
    write_index(&config, DIM * 2);

    assert!(SearchEngine::start(&config).await.is_err());
}

#[tokio::test]
async fn catalog_built_at_other_dimension_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM).await;
    write_catalog(&config, DIM * 2);

    let err = SearchEngine::start(&config).await.err().unwrap();
    assert!(format!("{err:#}").contains("dimension"));
}

#[tokio::test]
async fn qdrant_vector_size_mismatch_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), DIM * 2).await;

    let err = SearchEngine::start(&config).await.err().unwrap();
    assert!(format!("{err:#}").contains("vector size"));
}

#[tokio::test]
async fn unreachable_default_embedder_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = setup(tmp.path(), DIM).await;
    config.inference.url = closed_port_url().await;

    assert!(SearchEngine::start(&config).await.is_err());
}
