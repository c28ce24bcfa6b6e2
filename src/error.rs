//! Error taxonomy shared by every backend.
//!
//! Backends translate their transport-specific failures into [`EmbedError`] or
//! [`IndexError`] at their own boundary. The orchestrator folds both into a
//! [`SearchError`], which carries a stable [`ReasonCode`] for callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures from an embedding backend.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The image is empty, truncated, or in an unsupported format.
    #[error("invalid image: {0}")]
    Input(String),
    /// Inference could not run: session failure, network error, timeout, bad response.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    /// The model produced a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failures from an index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index service is unreachable, timed out, or answered with garbage.
    #[error("index backend unavailable: {0}")]
    Unavailable(String),
    /// The referenced collection or index does not exist.
    #[error("catalog not found: {0}")]
    CatalogNotFound(String),
    #[error("index dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Two catalog entries share an identifier.
    #[error("duplicate catalog id: {0}")]
    DuplicateId(String),
    /// The persisted index file failed validation.
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, caller-facing failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidTopK,
    InvalidInput,
    BackendUnavailable,
    CatalogNotFound,
    Configuration,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTopK => "invalid_top_k",
            Self::InvalidInput => "invalid_input",
            Self::BackendUnavailable => "backend_unavailable",
            Self::CatalogNotFound => "catalog_not_found",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single failure a search caller can observe.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("top_k must be a positive integer, got {0}")]
    InvalidTopK(i64),
    #[error(transparent)]
    InvalidInput(EmbedError),
    #[error("search unavailable: {0}")]
    BackendUnavailable(String),
    #[error("catalog not found: {0}")]
    CatalogNotFound(String),
    /// Dimensions disagree between the embedder and the index. Startup
    /// validation should make this unreachable.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SearchError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::InvalidTopK(_) => ReasonCode::InvalidTopK,
            Self::InvalidInput(_) => ReasonCode::InvalidInput,
            Self::BackendUnavailable(_) => ReasonCode::BackendUnavailable,
            Self::CatalogNotFound(_) => ReasonCode::CatalogNotFound,
            Self::Configuration(_) => ReasonCode::Configuration,
        }
    }
}

impl From<EmbedError> for SearchError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Input(_) => Self::InvalidInput(err),
            EmbedError::Unavailable(msg) => Self::BackendUnavailable(msg),
            EmbedError::DimensionMismatch { .. } => Self::Configuration(err.to_string()),
        }
    }
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(msg) => Self::BackendUnavailable(msg),
            IndexError::CatalogNotFound(name) => Self::CatalogNotFound(name),
            IndexError::Io(e) => Self::BackendUnavailable(e.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}
