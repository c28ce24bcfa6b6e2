//! CLI `doctor` command: check every backend and print a health report.

use anyhow::Result;

use imsearch::catalog;
use imsearch::config::ImsearchConfig;
use imsearch::embedding::{self, EmbedderKind};
use imsearch::index::flat::FlatIndex;
use imsearch::index::qdrant::QdrantIndex;

/// Probe config, models, index file, catalog, and remote services.
pub async fn doctor(config: &ImsearchConfig) -> Result<()> {
    println!("imsearch Health Report");
    println!("======================");
    println!();

    println!("Config:            OK");
    println!("Default backends:  {} embedder, {} index", config.embedding.backend, config.index.backend);
    println!("Dimension:         {}", config.embedding.dimension);
    println!();

    println!("Embedders:");
    for kind in [EmbedderKind::Local, EmbedderKind::Remote] {
        let target = match kind {
            EmbedderKind::Local => config.resolved_model_path().display().to_string(),
            EmbedderKind::Remote => config.inference.url.clone(),
        };
        match embedding::create_embedder(kind, config).await {
            Ok(_) => println!("  {:<8} OK      {target}", kind.as_str()),
            Err(e) => println!("  {:<8} FAILED  {target}: {e:#}", kind.as_str()),
        }
    }
    println!();

    let index_path = config.resolved_index_path();
    println!("Local index:       {}", index_path.display());
    if !index_path.exists() {
        println!("  Status:          not built");
    } else {
        let size = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);
        println!("  File size:       {}", format_bytes(size));
        match FlatIndex::load(&index_path, config.embedding.dimension) {
            Ok(index) => println!("  Status:          OK ({} entries)", index.len()),
            Err(e) => println!("  Status:          FAILED ({e})"),
        }
    }
    println!();

    let catalog_path = config.resolved_catalog_path();
    println!("Catalog:           {}", catalog_path.display());
    if catalog_path.exists() {
        let conn = catalog::open_catalog(&catalog_path)?;
        println!("  Items:           {}", catalog::count(&conn)?);
        let stored = catalog::get_meta(&conn, "embedding_model")?;
        println!("  Stored model:    {}", stored.as_deref().unwrap_or("(not set)"));
        println!("  Configured:      {}", config.embedding.model);
        if let Some(ref stored) = stored {
            if stored != &config.embedding.model {
                println!("  WARNING: model mismatch! Run `imsearch index build` to re-embed the catalog.");
            }
        }
    } else {
        println!("  Status:          not built");
    }
    println!();

    println!("Qdrant:            {}", config.qdrant.url);
    let qdrant = QdrantIndex::new(&config.qdrant)?;
    match qdrant.collection_info().await {
        Ok(info) => {
            let size_ok = info
                .vector_size
                .map_or(true, |s| s == config.embedding.dimension);
            println!(
                "  Collection:      {} ({}, {} points)",
                info.name,
                info.status,
                info.points_count.unwrap_or(0)
            );
            if !size_ok {
                println!(
                    "  WARNING: vector size {:?} != configured dimension {}",
                    info.vector_size, config.embedding.dimension
                );
            }
        }
        Err(e) => println!("  Status:          FAILED ({e})"),
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
