//! Search orchestration: image bytes → embedding → index hits → ranked products.
//!
//! [`SearchEngine`] is the explicitly constructed service context. It owns the
//! loaded embedders, the index backends, and the catalog metadata handle, and
//! is shared read-only (behind `Arc`) by every request.

pub mod mapper;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::types::Product;
use crate::catalog::{self, CatalogStore};
use crate::config::ImsearchConfig;
use crate::embedding::{self, EmbedderKind, ImageEmbedder};
use crate::error::{IndexError, SearchError};
use crate::index::local::LocalIndex;
use crate::index::qdrant::QdrantIndex;
use crate::index::{IndexKind, Metric, VectorIndex};

/// Which embedder and which index serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelector {
    pub embedder: EmbedderKind,
    pub index: IndexKind,
}

/// Ranked products, best first, with the score semantics of the index that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProducts {
    pub metric: Metric,
    pub products: Vec<Product>,
}

/// Request-path knobs, resolved from config.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub embed_timeout: Duration,
    pub index_timeout: Duration,
    pub retries: u32,
}

impl SearchSettings {
    pub fn from_config(config: &ImsearchConfig) -> Self {
        Self {
            default_top_k: config.search.default_top_k,
            max_top_k: config.search.max_top_k,
            embed_timeout: Duration::from_millis(config.embedding.timeout_ms),
            index_timeout: Duration::from_millis(config.index.timeout_ms),
            retries: config.search.retries,
        }
    }
}

pub struct SearchEngine {
    embedders: HashMap<EmbedderKind, Arc<dyn ImageEmbedder>>,
    indexes: HashMap<IndexKind, Arc<dyn VectorIndex>>,
    local_index: Option<Arc<LocalIndex>>,
    catalog: CatalogStore,
    settings: SearchSettings,
    defaults: BackendSelector,
}

impl SearchEngine {
    /// An engine with no backends registered. See [`SearchEngine::start`] for
    /// the config-driven constructor.
    pub fn new(catalog: CatalogStore, settings: SearchSettings, defaults: BackendSelector) -> Self {
        Self {
            embedders: HashMap::new(),
            indexes: HashMap::new(),
            local_index: None,
            catalog,
            settings,
            defaults,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn ImageEmbedder>) -> Self {
        self.embedders.insert(embedder.kind(), embedder);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.indexes.insert(index.kind(), index);
        self
    }

    /// Register the local index, keeping a handle for snapshot reloads.
    pub fn with_local_index(mut self, index: Arc<LocalIndex>) -> Self {
        self.indexes
            .insert(IndexKind::Local, Arc::clone(&index) as Arc<dyn VectorIndex>);
        self.local_index = Some(index);
        self
    }

    /// Load every backend the config names.
    ///
    /// The default embedder and default index are required; the others are
    /// loaded when available and skipped with a warning otherwise. A corrupt
    /// or dimension-mismatched local index file, a dimension-mismatched
    /// remote collection, or invalid config aborts startup.
    pub async fn start(config: &ImsearchConfig) -> Result<Self> {
        config.validate()?;
        let defaults = BackendSelector {
            embedder: config.default_embedder()?,
            index: config.default_index()?,
        };
        let dimension = config.embedding.dimension;

        let catalog_path = config.resolved_catalog_path();
        let catalog = CatalogStore::new(catalog::open_catalog(&catalog_path)?);
        catalog.check_provenance(&config.embedding.model, dimension)?;

        let mut engine = Self::new(catalog, SearchSettings::from_config(config), defaults);

        for kind in [EmbedderKind::Local, EmbedderKind::Remote] {
            match embedding::create_embedder(kind, config).await {
                Ok(embedder) => {
                    tracing::info!(embedder = %kind, "embedding backend ready");
                    engine = engine.with_embedder(embedder);
                }
                Err(e) if kind == defaults.embedder => {
                    return Err(e.context(format!("default embedder '{kind}' failed to load")));
                }
                Err(e) => {
                    tracing::warn!(embedder = %kind, error = %e, "optional embedding backend not loaded");
                }
            }
        }

        let index_path = config.resolved_index_path();
        if defaults.index == IndexKind::Local || index_path.exists() {
            let local = LocalIndex::open(&index_path, dimension).with_context(|| {
                format!(
                    "failed to load local index {} (run `imsearch index build` to create it)",
                    index_path.display()
                )
            })?;
            tracing::info!(entries = local.snapshot().len(), "local index ready");
            engine = engine.with_local_index(Arc::new(local));
        } else {
            tracing::info!(path = %index_path.display(), "no local index file, local backend disabled");
        }

        let qdrant = QdrantIndex::new(&config.qdrant)?;
        match qdrant.collection_info().await {
            Ok(info) => {
                if let Some(size) = info.vector_size {
                    anyhow::ensure!(
                        size == dimension,
                        "qdrant collection '{}' has vector size {size}, configured embedding.dimension is {dimension}",
                        info.name
                    );
                }
                tracing::info!(collection = %info.name, points = ?info.points_count, "qdrant collection ready");
            }
            Err(IndexError::CatalogNotFound(name)) => {
                tracing::warn!(collection = %name, "qdrant collection does not exist yet");
            }
            Err(e) => {
                tracing::warn!(error = %e, "qdrant unreachable at startup, remote index may fail");
            }
        }
        engine = engine.with_index(Arc::new(qdrant));

        tracing::info!(
            embedder = %defaults.embedder,
            index = %defaults.index,
            dimension,
            "search engine started"
        );
        Ok(engine)
    }

    /// Release models and clients.
    pub fn shutdown(self) {
        let embedders = self.embedders.len();
        let indexes = self.indexes.len();
        drop(self);
        tracing::info!(embedders, indexes, "search engine shut down");
    }

    pub fn default_selector(&self) -> BackendSelector {
        self.defaults
    }

    pub fn default_top_k(&self) -> usize {
        self.settings.default_top_k
    }

    /// Validate a requested result count. Non-positive values are rejected;
    /// values above `max_top_k` are clamped.
    pub fn resolve_top_k(&self, top_k: i64) -> Result<usize, SearchError> {
        if top_k <= 0 {
            return Err(SearchError::InvalidTopK(top_k));
        }
        Ok(usize::try_from(top_k)
            .unwrap_or(usize::MAX)
            .min(self.settings.max_top_k))
    }

    /// Search the catalog for images similar to `image`.
    pub async fn search(
        &self,
        image: &[u8],
        top_k: i64,
        selector: BackendSelector,
    ) -> Result<RankedProducts, SearchError> {
        let started = Instant::now();
        let top_k = self.resolve_top_k(top_k)?;

        let embedder: &dyn ImageEmbedder = self
            .embedders
            .get(&selector.embedder)
            .map(|e| e.as_ref())
            .ok_or_else(|| {
                SearchError::BackendUnavailable(format!(
                    "embedder '{}' is not loaded",
                    selector.embedder
                ))
            })?;
        let index: &dyn VectorIndex = self
            .indexes
            .get(&selector.index)
            .map(|i| i.as_ref())
            .ok_or_else(|| {
                SearchError::CatalogNotFound(format!("index '{}' is not loaded", selector.index))
            })?;

        let embedding = with_retries(
            "embedding",
            self.settings.embed_timeout,
            self.settings.retries,
            move || embedder.extract(image),
        )
        .await?;

        let query = embedding.as_slice();
        let hits = with_retries(
            "index query",
            self.settings.index_timeout,
            self.settings.retries,
            move || index.query(query, top_k),
        )
        .await?;
        if hits.metric != index.metric() || !hits.is_ranked() {
            return Err(SearchError::BackendUnavailable(format!(
                "index '{}' returned malformed results",
                selector.index
            )));
        }

        let ids: Vec<String> = hits.hits.iter().map(|h| h.id.clone()).collect();
        let lookup = self.catalog.lookup(ids).await.map_err(|e| {
            SearchError::BackendUnavailable(format!("catalog metadata lookup failed: {e}"))
        })?;
        let products = mapper::map_hits(&hits, &lookup);

        tracing::info!(
            embedder = %selector.embedder,
            index = %selector.index,
            top_k,
            hits = hits.hits.len(),
            returned = products.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search completed"
        );

        Ok(RankedProducts {
            metric: hits.metric,
            products,
        })
    }

    /// Re-read the local index file and swap the live snapshot.
    pub fn reload_local_index(&self) -> Result<usize, SearchError> {
        let local = self
            .local_index
            .as_ref()
            .ok_or_else(|| SearchError::CatalogNotFound("local index is not loaded".into()))?;
        Ok(local.reload()?)
    }
}

/// Run one backend stage under a timeout, retrying only when the backend
/// reports itself unavailable. The caller sees at most one error.
async fn with_retries<T, E, F, Fut>(
    stage: &str,
    timeout: Duration,
    retries: u32,
    mut op: F,
) -> Result<T, SearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<SearchError>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(SearchError::BackendUnavailable(format!(
                "{stage} timed out after {} ms",
                timeout.as_millis()
            ))),
        };

        match result {
            Err(SearchError::BackendUnavailable(reason)) if attempt < retries => {
                attempt += 1;
                tracing::warn!(stage, attempt, reason = %reason, "backend unavailable, retrying");
            }
            other => return other,
        }
    }
}
