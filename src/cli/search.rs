use std::path::Path;

use anyhow::{Context, Result};

use imsearch::config::ImsearchConfig;
use imsearch::embedding::EmbedderKind;
use imsearch::index::IndexKind;
use imsearch::search::SearchEngine;

/// Run a one-off image search from the terminal.
pub async fn search(
    config: &ImsearchConfig,
    image: &Path,
    top_k: Option<i64>,
    embedder: Option<EmbedderKind>,
    index: Option<IndexKind>,
) -> Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("failed to read image: {}", image.display()))?;

    let engine = SearchEngine::start(config).await?;
    let mut selector = engine.default_selector();
    if let Some(kind) = embedder {
        selector.embedder = kind;
    }
    if let Some(kind) = index {
        selector.index = kind;
    }
    let top_k = top_k.unwrap_or(engine.default_top_k() as i64);

    let ranked = engine.search(&bytes, top_k, selector).await?;
    engine.shutdown();

    if ranked.products.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) via {} + {} ({:?} scores)\n",
        ranked.products.len(),
        selector.embedder,
        selector.index,
        ranked.metric
    );

    for (i, product) in ranked.products.iter().enumerate() {
        println!(
            "  {}. {} [{}] (score: {:.4})",
            i + 1,
            product.name,
            product.id,
            product.score,
        );
        println!("     {}", product.image_path);
        if let Some(ref meta) = product.metadata {
            println!("     {meta}");
        }
        println!();
    }

    Ok(())
}
