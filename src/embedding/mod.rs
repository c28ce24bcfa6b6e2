//! Image-to-vector embedding pipeline.
//!
//! Provides the [`ImageEmbedder`] trait with two implementations: an in-process
//! ONNX Runtime forward pass ([`local::LocalEmbedder`]) and a Triton / KServe v2
//! inference server ([`remote::RemoteEmbedder`]). Both share the same
//! preprocessing and produce vectors of exactly the configured dimension.

pub mod local;
pub mod preprocess;
pub mod remote;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ImsearchConfig;
use crate::error::EmbedError;

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// ONNX Runtime in this process.
    Local,
    /// Inference server reached over HTTP.
    Remote,
}

impl EmbedderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "onnx" => Ok(Self::Local),
            "remote" | "triton" => Ok(Self::Remote),
            _ => Err(format!("unknown embedder: {s}. Supported: local, remote")),
        }
    }
}

/// Turns encoded image bytes into a fixed-length embedding.
///
/// Implementations must be stateless across calls: the same bytes and model
/// always yield the same vector (within floating-point tolerance).
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn kind(&self) -> EmbedderKind;

    /// Number of dimensions every returned vector has.
    fn dimensions(&self) -> usize;

    /// Embed one encoded image (JPEG, PNG, WebP, ...).
    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError>;
}

/// Check a model output against the configured dimension.
pub(crate) fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::Unavailable(
            "model output contains non-finite values".into(),
        ));
    }
    Ok(vector)
}

/// Create an embedder from config.
///
/// Loading validates the model's output dimension against
/// `embedding.dimension`, so a mismatch fails here rather than per request.
pub async fn create_embedder(
    kind: EmbedderKind,
    config: &ImsearchConfig,
) -> Result<Arc<dyn ImageEmbedder>> {
    match kind {
        EmbedderKind::Local => {
            let embedder = local::LocalEmbedder::new(config)?;
            Ok(Arc::new(embedder))
        }
        EmbedderKind::Remote => {
            let embedder = remote::RemoteEmbedder::connect(config).await?;
            Ok(Arc::new(embedder))
        }
    }
}
