#![allow(dead_code)]

pub mod mock_qdrant;
pub mod mock_triton;

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};

use imsearch::catalog::types::CatalogItem;
use imsearch::catalog::{self, CatalogStore};
use imsearch::embedding::{EmbedderKind, ImageEmbedder};
use imsearch::error::{EmbedError, IndexError};
use imsearch::index::{IndexKind, Metric, SearchHits, VectorIndex};
use imsearch::search::{BackendSelector, SearchEngine, SearchSettings};

pub const DIM: usize = 8;

/// Deterministic `DIM`-dim embedding with a spike at position `seed`.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed as usize % DIM] = 1.0;
    v
}

/// A small solid-colour PNG.
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn item(id: &str) -> CatalogItem {
    CatalogItem {
        id: id.into(),
        name: format!("Product {id}"),
        image_path: format!("images/{id}.jpg"),
        metadata: Some(serde_json::json!({ "sku": id })),
    }
}

/// In-memory catalog store holding the given items.
pub fn catalog_with(ids: &[&str]) -> CatalogStore {
    let mut conn = catalog::open_memory_catalog().unwrap();
    let items: Vec<CatalogItem> = ids.iter().map(|id| item(id)).collect();
    catalog::replace_all(&mut conn, &items, "test-model", DIM).unwrap();
    CatalogStore::new(conn)
}

pub fn settings() -> SearchSettings {
    SearchSettings {
        default_top_k: 20,
        max_top_k: 100,
        embed_timeout: Duration::from_millis(500),
        index_timeout: Duration::from_millis(200),
        retries: 0,
    }
}

pub fn engine(catalog: CatalogStore, embedder: EmbedderKind, index: IndexKind) -> SearchEngine {
    SearchEngine::new(catalog, settings(), BackendSelector { embedder, index })
}

/// Embedder that needs no model: the first byte of the input picks the spike.
/// Empty input fails the same way a real decoder does.
pub struct FakeEmbedder {
    kind: EmbedderKind,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(kind: EmbedderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageEmbedder for FakeEmbedder {
    fn kind(&self) -> EmbedderKind {
        self.kind
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match image.first() {
            None => Err(EmbedError::Input("empty image payload".into())),
            Some(&seed) => Ok(test_embedding(seed)),
        }
    }
}

/// Index backend that returns fixed hits, optionally after a delay.
pub struct ScriptedIndex {
    kind: IndexKind,
    metric: Metric,
    hits: Vec<(String, f32)>,
    delay: Option<Duration>,
    pub queries: AtomicUsize,
}

impl ScriptedIndex {
    pub fn new(kind: IndexKind, metric: Metric, hits: &[(&str, f32)]) -> Self {
        Self {
            kind,
            metric,
            hits: hits.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            delay: None,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn query(&self, _embedding: &[f32], top_k: usize) -> Result<SearchHits, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SearchHits {
            metric: self.metric,
            hits: self
                .hits
                .iter()
                .take(top_k)
                .map(|(id, score)| imsearch::index::Hit {
                    id: id.clone(),
                    score: *score,
                })
                .collect(),
        })
    }
}

/// Serve `router` on an ephemeral local port; returns the base URL.
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
