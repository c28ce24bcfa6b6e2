//! Catalog manifest: the JSON input of an offline index build.
//!
//! ```json
//! [
//!   {"id": "sku-1", "name": "Red sneaker", "image": "images/sku-1.jpg", "metadata": {"price": 59}}
//! ]
//! ```
//!
//! Relative `image` paths resolve against the manifest's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::types::CatalogItem;

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
    id: String,
    name: String,
    image: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// A manifest entry with its image path resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub item: CatalogItem,
    pub image_file: PathBuf,
}

/// Read and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_manifest(&json, base)
}

/// Parse manifest JSON, resolving images relative to `base`.
pub fn parse_manifest(json: &str, base: &Path) -> Result<Vec<ManifestEntry>> {
    let raw: Vec<RawEntry> = serde_json::from_str(json).context("failed to parse manifest JSON")?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());
    for entry in raw {
        if entry.id.trim().is_empty() {
            bail!("manifest entry with empty id (name: {:?})", entry.name);
        }
        if !seen.insert(entry.id.clone()) {
            bail!("duplicate catalog id in manifest: {}", entry.id);
        }

        let image_file = {
            let p = Path::new(&entry.image);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        entries.push(ManifestEntry {
            item: CatalogItem {
                id: entry.id,
                name: entry.name,
                image_path: entry.image,
                metadata: entry.metadata,
            },
            image_file,
        });
    }
    Ok(entries)
}
