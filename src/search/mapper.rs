//! Hit → product mapping.

use std::collections::HashMap;

use crate::catalog::types::{CatalogItem, Product};
use crate::index::SearchHits;

/// Map ranked hits onto catalog metadata, keeping the backend's order.
///
/// Hits with no metadata (index newer or older than the catalog) are dropped
/// and logged; they never fail the request.
pub fn map_hits(hits: &SearchHits, lookup: &HashMap<String, CatalogItem>) -> Vec<Product> {
    let mut products = Vec::with_capacity(hits.hits.len());
    let mut missing: Vec<&str> = Vec::new();

    for hit in &hits.hits {
        match lookup.get(&hit.id) {
            Some(item) => products.push(Product::from_item(item, hit.score)),
            None => missing.push(&hit.id),
        }
    }

    if !missing.is_empty() {
        tracing::warn!(
            dropped = missing.len(),
            ids = ?missing,
            "search hits missing from catalog metadata; index and catalog are out of sync"
        );
    }

    products
}
