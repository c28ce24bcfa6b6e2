//! Swappable local index snapshot.
//!
//! Queries clone the current `Arc<FlatIndex>` and scan it without holding any
//! lock. A reload builds a complete new snapshot first and only then replaces
//! the reference, so in-flight queries finish against the old one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::flat::FlatIndex;
use super::{IndexKind, Metric, SearchHits, VectorIndex};
use crate::error::IndexError;

pub struct LocalIndex {
    path: PathBuf,
    dimension: usize,
    snapshot: RwLock<Arc<FlatIndex>>,
}

impl LocalIndex {
    /// Load the index file at `path`. Any validation failure is returned to
    /// the caller, which treats it as fatal at startup.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let index = FlatIndex::load(&path, dimension)?;
        Ok(Self {
            path,
            dimension,
            snapshot: RwLock::new(Arc::new(index)),
        })
    }

    /// Serve an already-built index. `reload` reads from `path`.
    pub fn from_index(path: impl AsRef<Path>, index: FlatIndex) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            dimension: index.dimension(),
            snapshot: RwLock::new(Arc::new(index)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The snapshot new queries run against.
    pub fn snapshot(&self) -> Arc<FlatIndex> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the live snapshot wholesale.
    pub fn swap(&self, index: FlatIndex) -> Result<(), IndexError> {
        if index.dimension() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: index.dimension(),
            });
        }
        let entries = index.len();
        let next = Arc::new(index);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(entries, "local index snapshot swapped");
        Ok(())
    }

    /// Re-read the index file and swap it in. On failure the previous
    /// snapshot keeps serving.
    pub fn reload(&self) -> Result<usize, IndexError> {
        let index = FlatIndex::load(&self.path, self.dimension).inspect_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "index reload failed, keeping current snapshot");
        })?;
        let entries = index.len();
        self.swap(index)?;
        Ok(entries)
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Local
    }

    fn metric(&self) -> Metric {
        Metric::L2Squared
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<SearchHits, IndexError> {
        self.snapshot().query(embedding, top_k)
    }
}
