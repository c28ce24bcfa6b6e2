use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::embedding::EmbedderKind;
use crate::index::IndexKind;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImsearchConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub inference: InferenceConfig,
    pub index: IndexConfig,
    pub qdrant: QdrantConfig,
    pub catalog: CatalogConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Directory uploads are copied into before searching. Empty disables it.
    pub upload_dir: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Default embedder: `"local"` or `"remote"`.
    pub backend: String,
    pub model: String,
    pub dimension: usize,
    /// Square input resolution the network expects.
    pub input_size: u32,
    pub model_path: String,
    /// Where `imsearch model download` fetches the ONNX export from.
    pub model_url: String,
    pub intra_threads: usize,
    pub timeout_ms: u64,
}

/// Triton / KServe v2 inference server hosting the same model.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    pub url: String,
    pub model: String,
    pub input_name: String,
    pub output_name: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Default index: `"local"` or `"remote"`.
    pub backend: String,
    pub path: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub upsert_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    /// Extra attempts after a backend reports itself unavailable.
    pub retries: u32,
}

impl Default for ImsearchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            embedding: EmbeddingConfig::default(),
            inference: InferenceConfig::default(),
            index: IndexConfig::default(),
            qdrant: QdrantConfig::default(),
            catalog: CatalogConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            log_level: "info".into(),
            upload_dir: String::new(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let model_path = default_imsearch_dir()
            .join("models")
            .join("efficientnet_b3.onnx")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: "local".into(),
            model: "efficientnet_b3".into(),
            dimension: 1000,
            input_size: 300,
            model_path,
            model_url: String::new(),
            intra_threads: 4,
            timeout_ms: 10_000,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
            model: "efficientnet_b3".into(),
            input_name: "input__0".into(),
            output_name: "output__0".into(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let path = default_imsearch_dir()
            .join("index.bin")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: "local".into(),
            path,
            timeout_ms: 5_000,
        }
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".into(),
            collection: "image-search-engine".into(),
            api_key: None,
            timeout_ms: 5_000,
            upsert_batch_size: 64,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let db_path = default_imsearch_dir()
            .join("catalog.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            max_top_k: 100,
            retries: 0,
        }
    }
}

/// Returns `~/.imsearch/`
pub fn default_imsearch_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".imsearch")
}

/// Returns the default config file path: `~/.imsearch/config.toml`
pub fn default_config_path() -> PathBuf {
    default_imsearch_dir().join("config.toml")
}

impl ImsearchConfig {
    /// Load config from the default TOML file (if it exists) then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, apply env overrides, and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            ImsearchConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("IMSEARCH_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("IMSEARCH_EMBEDDING_BACKEND") {
            self.embedding.backend = val;
        }
        if let Ok(val) = std::env::var("IMSEARCH_INDEX_BACKEND") {
            self.index.backend = val;
        }
        if let Ok(val) = std::env::var("IMSEARCH_INDEX_PATH") {
            self.index.path = val;
        }
        if let Ok(val) = std::env::var("IMSEARCH_CATALOG_DB") {
            self.catalog.db_path = val;
        }
        if let Ok(val) = std::env::var("QDRANT_URL") {
            self.qdrant.url = val;
        }
        if let Ok(val) = std::env::var("TRITON_SERVER_URL") {
            self.inference.url = val;
        }
    }

    /// Reject any value the service cannot start with. Every error here is fatal.
    pub fn validate(&self) -> Result<()> {
        self.default_embedder()?;
        self.default_index()?;

        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than 0");
        }
        if self.embedding.input_size == 0 {
            bail!("embedding.input_size must be greater than 0");
        }
        if self.search.max_top_k == 0 {
            bail!("search.max_top_k must be greater than 0");
        }
        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            bail!(
                "search.default_top_k must be within 1..={} (got {})",
                self.search.max_top_k,
                self.search.default_top_k
            );
        }
        if self.qdrant.collection.trim().is_empty() {
            bail!("qdrant.collection must not be empty");
        }
        if self.qdrant.upsert_batch_size == 0 {
            bail!("qdrant.upsert_batch_size must be greater than 0");
        }

        for (name, ms) in [
            ("embedding.timeout_ms", self.embedding.timeout_ms),
            ("inference.timeout_ms", self.inference.timeout_ms),
            ("index.timeout_ms", self.index.timeout_ms),
            ("qdrant.timeout_ms", self.qdrant.timeout_ms),
        ] {
            if ms == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        for (name, url) in [("qdrant.url", &self.qdrant.url), ("inference.url", &self.inference.url)] {
            reqwest::Url::parse(url).with_context(|| format!("{name} is not a valid URL: {url}"))?;
        }

        Ok(())
    }

    pub fn default_embedder(&self) -> Result<EmbedderKind> {
        self.embedding
            .backend
            .parse()
            .map_err(|e: String| anyhow::anyhow!("embedding.backend: {e}"))
    }

    pub fn default_index(&self) -> Result<IndexKind> {
        self.index
            .backend
            .parse()
            .map_err(|e: String| anyhow::anyhow!("index.backend: {e}"))
    }

    pub fn resolved_model_path(&self) -> PathBuf {
        expand_tilde(&self.embedding.model_path)
    }

    pub fn resolved_index_path(&self) -> PathBuf {
        expand_tilde(&self.index.path)
    }

    pub fn resolved_catalog_path(&self) -> PathBuf {
        expand_tilde(&self.catalog.db_path)
    }

    /// `None` when upload persistence is disabled.
    pub fn resolved_upload_dir(&self) -> Option<PathBuf> {
        let dir = self.server.upload_dir.trim();
        (!dir.is_empty()).then(|| expand_tilde(dir))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ImsearchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.embedding.dimension, 1000);
        assert_eq!(config.embedding.input_size, 300);
        assert_eq!(config.search.default_top_k, 20);
        assert_eq!(config.default_embedder().unwrap(), EmbedderKind::Local);
        assert_eq!(config.default_index().unwrap(), IndexKind::Local);
        assert!(config.index.path.ends_with("index.bin"));
        assert!(config.resolved_upload_dir().is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
upload_dir = "/tmp/uploads"

[embedding]
backend = "remote"
dimension = 512

[qdrant]
collection = "shoes"

[search]
default_top_k = 3
"#;
        let config: ImsearchConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.default_embedder().unwrap(), EmbedderKind::Remote);
        assert_eq!(config.embedding.dimension, 512);
        assert_eq!(config.qdrant.collection, "shoes");
        assert_eq!(config.search.default_top_k, 3);
        assert_eq!(config.resolved_upload_dir(), Some(PathBuf::from("/tmp/uploads")));
        // defaults still apply for unset fields
        assert_eq!(config.search.max_top_k, 100);
        assert_eq!(config.qdrant.url, "http://localhost:6333");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = ImsearchConfig::default();
        config.index.backend = "faiss-gpu".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("index.backend"));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut config = ImsearchConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_top_k_above_bound_is_rejected() {
        let mut config = ImsearchConfig::default();
        config.search.default_top_k = 500;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_top_k"));
    }

    #[test]
    fn bad_url_is_rejected() {
        let mut config = ImsearchConfig::default();
        config.qdrant.url = "not a url".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("qdrant.url"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = ImsearchConfig::default();
        config.index.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ImsearchConfig::default();
        std::env::set_var("IMSEARCH_INDEX_BACKEND", "remote");
        std::env::set_var("QDRANT_URL", "http://qdrant:6333");
        std::env::set_var("TRITON_SERVER_URL", "http://triton:8000");

        config.apply_env_overrides();

        assert_eq!(config.index.backend, "remote");
        assert_eq!(config.qdrant.url, "http://qdrant:6333");
        assert_eq!(config.inference.url, "http://triton:8000");

        // Clean up
        std::env::remove_var("IMSEARCH_INDEX_BACKEND");
        std::env::remove_var("QDRANT_URL");
        std::env::remove_var("TRITON_SERVER_URL");
    }
}
