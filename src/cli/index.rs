//! CLI `index` commands: build the catalog, delete remote points, show stats.

use std::path::Path;

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use imsearch::catalog::{self, manifest};
use imsearch::config::ImsearchConfig;
use imsearch::embedding;
use imsearch::index::flat::FlatIndex;
use imsearch::index::qdrant::QdrantIndex;
use imsearch::indexing;

use super::bar_style;

/// Embed every manifest image and rewrite the local index and catalog
/// metadata. With `remote`, also publish the vectors to Qdrant.
pub async fn build(config: &ImsearchConfig, manifest_path: &Path, remote: bool) -> Result<()> {
    config.validate()?;
    let entries = manifest::load_manifest(manifest_path)?;
    if entries.is_empty() {
        println!("Manifest is empty, the index and catalog will be emptied.");
    }

    let kind = config.default_embedder()?;
    let embedder = embedding::create_embedder(kind, config)
        .await
        .with_context(|| format!("failed to load '{kind}' embedder"))?;

    let qdrant = if remote {
        Some(QdrantIndex::new(&config.qdrant)?)
    } else {
        None
    };

    let mut conn = catalog::open_catalog(config.resolved_catalog_path())
        .context("failed to open catalog database")?;

    println!(
        "Embedding {} catalog images with '{}' ({kind})...",
        entries.len(),
        config.embedding.model
    );
    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(bar_style("  {bar:40.cyan/blue} {pos}/{len} ({eta})"));

    let report = indexing::build_catalog(
        embedder.as_ref(),
        &entries,
        &config.embedding.model,
        config.resolved_index_path(),
        &mut conn,
        qdrant.as_ref(),
        &pb,
    )
    .await;
    pb.finish_and_clear();
    let report = report?;

    println!(
        "Indexed {} items into {}.",
        report.items,
        report.index_path.display()
    );
    if let Some(n) = report.remote_upserted {
        println!("Upserted {n} points into qdrant collection '{}'.", config.qdrant.collection);
    }
    if let Some(n) = report.remote_removed.filter(|&n| n > 0) {
        println!("Removed {n} dropped item(s) from qdrant.");
    }
    println!("Running services pick up the new local index via POST /admin/reload-index.");
    Ok(())
}

/// Delete catalog items from the remote collection.
pub async fn delete(config: &ImsearchConfig, ids: &[String]) -> Result<()> {
    let qdrant = QdrantIndex::new(&config.qdrant)?;
    qdrant
        .delete(ids)
        .await
        .context("failed to delete points from qdrant")?;
    println!(
        "Deleted {} item(s) from qdrant collection '{}'.",
        ids.len(),
        config.qdrant.collection
    );
    Ok(())
}

/// Print local index and remote collection statistics.
pub async fn info(config: &ImsearchConfig) -> Result<()> {
    let dimension = config.embedding.dimension;
    let index_path = config.resolved_index_path();

    println!("Local index");
    println!("{}", "=".repeat(40));
    println!("  Path:            {}", index_path.display());
    if index_path.exists() {
        match FlatIndex::load(&index_path, dimension) {
            Ok(index) => {
                println!("  Entries:         {}", index.len());
                println!("  Dimension:       {}", index.dimension());
            }
            Err(e) => println!("  Status:          UNREADABLE ({e})"),
        }
    } else {
        println!("  Status:          not built (run `imsearch index build <manifest>`)");
    }
    println!();

    let catalog_path = config.resolved_catalog_path();
    println!("Catalog metadata");
    println!("{}", "=".repeat(40));
    println!("  Database:        {}", catalog_path.display());
    if catalog_path.exists() {
        let conn = catalog::open_catalog(&catalog_path)?;
        println!("  Items:           {}", catalog::count(&conn)?);
        let model = catalog::get_meta(&conn, "embedding_model")?;
        println!("  Built with:      {}", model.as_deref().unwrap_or("(unknown)"));
        if let Some(built_at) = catalog::get_meta(&conn, "built_at")? {
            println!("  Built at:        {built_at}");
        }
    } else {
        println!("  Status:          not built");
    }
    println!();

    println!("Remote index (qdrant)");
    println!("{}", "=".repeat(40));
    println!("  URL:             {}", config.qdrant.url);
    let qdrant = QdrantIndex::new(&config.qdrant)?;
    match qdrant.collection_info().await {
        Ok(info) => {
            println!("  Collection:      {}", info.name);
            println!("  Status:          {}", info.status);
            if let Some(points) = info.points_count {
                println!("  Points:          {points}");
            }
            if let Some(size) = info.vector_size {
                println!("  Vector size:     {size}");
            }
        }
        Err(e) => println!("  Status:          {e}"),
    }

    Ok(())
}
