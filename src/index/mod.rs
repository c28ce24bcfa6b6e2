//! Nearest-neighbor search over catalog embeddings.
//!
//! [`VectorIndex`] is the query contract shared by the in-memory
//! [`local::LocalIndex`] (a swappable [`flat::FlatIndex`] snapshot loaded from
//! disk) and the Qdrant-backed [`qdrant::QdrantIndex`]. Results always come back
//! best-first, with the score direction fixed per backend by [`Metric`].

pub mod flat;
pub mod local;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Which index backend to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Flat index file loaded into memory.
    Local,
    /// Qdrant collection.
    Remote,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "faiss" | "flat" => Ok(Self::Local),
            "remote" | "qdrant" => Ok(Self::Remote),
            _ => Err(format!("unknown index: {s}. Supported: local, remote")),
        }
    }
}

/// Score semantics of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance. Lower is better.
    L2Squared,
    /// Cosine similarity. Higher is better.
    Cosine,
}

impl Metric {
    /// `true` if `a` is at least as good a match as `b`.
    pub fn ranks_before(&self, a: f32, b: f32) -> bool {
        match self {
            Self::L2Squared => a <= b,
            Self::Cosine => a >= b,
        }
    }
}

/// One match: a catalog identifier and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
}

/// Ranked hits, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    pub metric: Metric,
    pub hits: Vec<Hit>,
}

impl SearchHits {
    pub fn empty(metric: Metric) -> Self {
        Self {
            metric,
            hits: Vec::new(),
        }
    }

    /// Whether scores respect the metric's direction position by position.
    pub fn is_ranked(&self) -> bool {
        self.hits
            .windows(2)
            .all(|w| self.metric.ranks_before(w[0].score, w[1].score))
    }
}

/// A catalog entry as it goes into an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Query contract shared by all index backends.
///
/// Querying an empty index returns empty hits, never an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn metric(&self) -> Metric;

    /// Up to `top_k` nearest entries, best first. `top_k` is already validated (> 0).
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<SearchHits, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(metric: Metric, scores: &[f32]) -> SearchHits {
        SearchHits {
            metric,
            hits: scores
                .iter()
                .enumerate()
                .map(|(i, &score)| Hit {
                    id: i.to_string(),
                    score,
                })
                .collect(),
        }
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("faiss".parse::<IndexKind>().unwrap(), IndexKind::Local);
        assert_eq!("qdrant".parse::<IndexKind>().unwrap(), IndexKind::Remote);
        assert!("milvus".parse::<IndexKind>().is_err());
    }

    #[test]
    fn ranking_direction_follows_metric() {
        assert!(hits(Metric::L2Squared, &[0.1, 0.4, 0.4, 0.9]).is_ranked());
        assert!(!hits(Metric::L2Squared, &[0.4, 0.1]).is_ranked());
        assert!(hits(Metric::Cosine, &[0.9, 0.4, 0.1]).is_ranked());
        assert!(!hits(Metric::Cosine, &[0.1, 0.9]).is_ranked());
        assert!(SearchHits::empty(Metric::Cosine).is_ranked());
    }

    #[test]
    fn metric_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Metric::L2Squared).unwrap(),
            "\"l2_squared\""
        );
    }
}
