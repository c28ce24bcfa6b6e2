//! Offline catalog indexing.
//!
//! Embeds every manifest image with one embedder, then writes the local index
//! file, the catalog metadata, and optionally the remote collection from the
//! same vectors. A full rebuild is the only supported way to change the
//! catalog, so running it twice over the same manifest yields the same state.
//!
//! The new index file is staged next to the live one and only renamed into
//! place once the catalog transaction has committed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rusqlite::Connection;

use crate::catalog::manifest::ManifestEntry;
use crate::catalog::types::{CatalogEntry, CatalogItem};
use crate::catalog;
use crate::embedding::ImageEmbedder;
use crate::index::flat::FlatIndex;
use crate::index::qdrant::QdrantIndex;
use crate::index::IndexEntry;

/// What a build wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub items: usize,
    pub index_path: PathBuf,
    pub remote_upserted: Option<usize>,
    /// Remote points removed because their ids left the catalog.
    pub remote_removed: Option<usize>,
}

/// Embed each manifest image. An unreadable or undecodable image aborts the
/// build, naming the catalog id.
pub async fn embed_entries(
    embedder: &dyn ImageEmbedder,
    entries: &[ManifestEntry],
    progress: &ProgressBar,
) -> Result<Vec<CatalogEntry>> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let bytes = tokio::fs::read(&entry.image_file).await.with_context(|| {
            format!(
                "failed to read image for catalog item {} ({})",
                entry.item.id,
                entry.image_file.display()
            )
        })?;
        let embedding = embedder
            .extract(&bytes)
            .await
            .with_context(|| format!("failed to embed catalog item {}", entry.item.id))?;

        out.push(CatalogEntry {
            item: entry.item.clone(),
            embedding,
        });
        progress.inc(1);
    }
    Ok(out)
}

/// Build the flat index from embedded entries and write it atomically.
pub fn write_local_index(
    entries: &[CatalogEntry],
    dimension: usize,
    path: &Path,
) -> Result<FlatIndex> {
    let index = FlatIndex::build(dimension, entries.iter().map(to_index_entry))
        .context("failed to build local index")?;
    index
        .save(path)
        .with_context(|| format!("failed to write index file {}", path.display()))?;
    tracing::info!(path = %path.display(), entries = index.len(), dimension, "local index written");
    Ok(index)
}

/// Ensure the remote collection exists, upsert every entry, then delete the
/// `stale` ids.
pub async fn publish_remote(
    qdrant: &QdrantIndex,
    entries: &[CatalogEntry],
    dimension: usize,
    stale: &[String],
) -> Result<usize> {
    qdrant
        .ensure_collection(dimension)
        .await
        .with_context(|| format!("failed to prepare qdrant collection '{}'", qdrant.collection()))?;
    let points: Vec<IndexEntry> = entries.iter().map(to_index_entry).collect();
    let n = qdrant
        .upsert(&points)
        .await
        .context("failed to upsert catalog into qdrant")?;
    qdrant
        .delete(stale)
        .await
        .context("failed to remove dropped items from qdrant")?;
    tracing::info!(
        collection = %qdrant.collection(),
        points = n,
        removed = stale.len(),
        "remote index updated"
    );
    Ok(n)
}

/// Run a full build: embed, write the local index, replace catalog metadata,
/// and publish to `remote` when given.
pub async fn build_catalog(
    embedder: &dyn ImageEmbedder,
    manifest: &[ManifestEntry],
    model: &str,
    index_path: PathBuf,
    conn: &mut Connection,
    remote: Option<&QdrantIndex>,
    progress: &ProgressBar,
) -> Result<BuildReport> {
    let dimension = embedder.dimensions();
    let entries = embed_entries(embedder, manifest, progress).await?;
    let items: Vec<CatalogItem> = entries.iter().map(|e| e.item.clone()).collect();

    let staged = index_path.with_extension("staged");
    write_local_index(&entries, dimension, &staged)?;

    let previous = match commit_catalog(conn, &items, model, dimension) {
        Ok(previous) => previous,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };
    std::fs::rename(&staged, &index_path)
        .with_context(|| format!("failed to move index into place at {}", index_path.display()))?;
    tracing::info!(path = %index_path.display(), "local index published");

    let current: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let stale: Vec<String> = previous
        .into_iter()
        .filter(|id| !current.contains(id.as_str()))
        .collect();

    let (remote_upserted, remote_removed) = match remote {
        Some(qdrant) => {
            let n = publish_remote(qdrant, &entries, dimension, &stale).await?;
            (Some(n), Some(stale.len()))
        }
        None => (None, None),
    };

    Ok(BuildReport {
        items: entries.len(),
        index_path,
        remote_upserted,
        remote_removed,
    })
}

/// Replace the catalog metadata, returning the ids it held before.
fn commit_catalog(
    conn: &mut Connection,
    items: &[CatalogItem],
    model: &str,
    dimension: usize,
) -> Result<Vec<String>> {
    let previous = catalog::all_items(conn)?.into_iter().map(|i| i.id).collect();
    catalog::replace_all(conn, items, model, dimension)?;
    Ok(previous)
}

fn to_index_entry(entry: &CatalogEntry) -> IndexEntry {
    IndexEntry {
        id: entry.item.id.clone(),
        embedding: entry.embedding.clone(),
    }
}
