//! Catalog record types.

use serde::{Deserialize, Serialize};

/// Display metadata for one catalog item, matching the `products` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Stable identifier, unique across the catalog.
    pub id: String,
    pub name: String,
    /// Where the catalog image lives (path or URL), as given in the manifest.
    pub image_path: String,
    /// Arbitrary JSON metadata (price, category, brand, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A catalog item plus its embedding, produced by the offline build.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub item: CatalogItem,
    pub embedding: Vec<f32>,
}

/// A ranked search result as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub image_path: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Product {
    pub fn from_item(item: &CatalogItem, score: f32) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            image_path: item.image_path.clone(),
            score,
            metadata: item.metadata.clone(),
        }
    }
}
