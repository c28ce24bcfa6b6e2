//! Qdrant collection backend over the REST API.
//!
//! Qdrant point ids must be integers or UUIDs, so every catalog id is mapped to
//! a deterministic UUIDv5 ([`point_id`]) and the original id is stored in the
//! `catalog_id` payload field. Upserting the same catalog id twice therefore
//! overwrites the same point.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{Hit, IndexEntry, IndexKind, Metric, SearchHits, VectorIndex};
use crate::config::QdrantConfig;
use crate::error::IndexError;

const CATALOG_ID_FIELD: &str = "catalog_id";

/// Deterministic Qdrant point id for a catalog id.
pub fn point_id(catalog_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, catalog_id.as_bytes())
}

#[derive(Debug, Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    batch_size: usize,
}

/// Summary of a collection's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub status: String,
    pub points_count: Option<u64>,
    pub vector_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct CollectionResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct PointStruct<'a> {
    id: String,
    vector: &'a [f32],
    payload: serde_json::Value,
}

impl QdrantIndex {
    pub fn new(config: &QdrantConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to create HTTP client for Qdrant")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            batch_size: config.upsert_batch_size.max(1),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    /// Send a request and translate transport and status failures.
    async fn send(&self, request: RequestBuilder) -> Result<Response, IndexError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(format!("qdrant request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IndexError::CatalogNotFound(self.collection.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Unavailable(format!(
                "qdrant returned HTTP {status}: {body}"
            )));
        }
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, IndexError> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| IndexError::Unavailable(format!("malformed qdrant response: {e}")))?;
        Ok(envelope.result)
    }

    /// Fetch collection status, point count, and vector size.
    pub async fn collection_info(&self) -> Result<CollectionInfo, IndexError> {
        let response = self
            .send(self.client.get(self.collection_url("")))
            .await?;
        let result: CollectionResult = Self::decode(response).await?;

        // Unnamed vectors: {"size": N, ...}. Named vectors: {"name": {"size": N}}.
        let vector_size = result
            .config
            .params
            .vectors
            .get("size")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        Ok(CollectionInfo {
            name: self.collection.clone(),
            status: result.status,
            points_count: result.points_count,
            vector_size,
        })
    }

    /// Create the collection (cosine distance) if absent; verify its vector
    /// size if present.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<(), IndexError> {
        match self.collection_info().await {
            Ok(info) => match info.vector_size {
                Some(size) if size != dimension => Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: size,
                }),
                _ => Ok(()),
            },
            Err(IndexError::CatalogNotFound(_)) => {
                let body = json!({
                    "vectors": { "size": dimension, "distance": "Cosine" }
                });
                self.send(self.client.put(self.collection_url("")).json(&body))
                    .await?;
                tracing::info!(collection = %self.collection, dimension, "qdrant collection created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Insert or replace entries, in batches. Idempotent per catalog id.
    pub async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize, IndexError> {
        for batch in entries.chunks(self.batch_size) {
            let points: Vec<PointStruct<'_>> = batch
                .iter()
                .map(|entry| PointStruct {
                    id: point_id(&entry.id).to_string(),
                    vector: &entry.embedding,
                    payload: json!({ CATALOG_ID_FIELD: entry.id }),
                })
                .collect();

            self.send(
                self.client
                    .put(self.collection_url("/points?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;

            tracing::debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }
        Ok(entries.len())
    }

    /// Delete entries by catalog id. Missing ids are ignored by Qdrant.
    pub async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        let points: Vec<String> = ids.iter().map(|id| point_id(id).to_string()).collect();
        self.send(
            self.client
                .post(self.collection_url("/points/delete?wait=true"))
                .json(&json!({ "points": points })),
        )
        .await?;
        tracing::info!(collection = %self.collection, points = ids.len(), "deleted points");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Remote
    }

    fn metric(&self) -> Metric {
        Metric::Cosine
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<SearchHits, IndexError> {
        let body = json!({
            "vector": embedding,
            "limit": top_k,
            "with_payload": [CATALOG_ID_FIELD],
        });
        let response = self
            .send(
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body),
            )
            .await?;
        let points: Vec<ScoredPoint> = Self::decode(response).await?;

        let hits = points
            .into_iter()
            .map(|point| {
                let id = point
                    .payload
                    .as_ref()
                    .and_then(|p| p.get(CATALOG_ID_FIELD))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| match point.id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    });
                Hit {
                    id,
                    score: point.score,
                }
            })
            .collect();

        Ok(SearchHits {
            metric: Metric::Cosine,
            hits,
        })
    }
}
