//! Flat (brute-force) L2 index and its on-disk format.
//!
//! File layout, all integers little-endian:
//!
//! | Field | Size |
//! |-------|------|
//! | magic `IMSX` | 4 |
//! | format version | u32 |
//! | dimension | u32 |
//! | entry count `n` | u64 |
//! | `n` ids, each `u32` byte length + UTF-8 | variable |
//! | `n * dimension` f32 vectors, row-major | `4 * n * dimension` |
//!
//! The file must end exactly after the vector block.

use std::collections::HashSet;
use std::path::Path;

use ndarray::{Array2, ArrayView1};

use super::{Hit, IndexEntry, Metric, SearchHits};
use crate::error::IndexError;

const MAGIC: &[u8; 4] = b"IMSX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Immutable in-memory index. Build it once, query it from any number of threads.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<String>,
    vectors: Array2<f32>,
}

impl FlatIndex {
    /// Build an index from the full catalog.
    ///
    /// Every entry must have exactly `dimension` values and a unique id.
    pub fn build(
        dimension: usize,
        entries: impl IntoIterator<Item = IndexEntry>,
    ) -> Result<Self, IndexError> {
        let mut ids = Vec::new();
        let mut flat = Vec::new();
        let mut seen = HashSet::new();

        for entry in entries {
            if entry.embedding.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: entry.embedding.len(),
                });
            }
            if !seen.insert(entry.id.clone()) {
                return Err(IndexError::DuplicateId(entry.id));
            }
            flat.extend_from_slice(&entry.embedding);
            ids.push(entry.id);
        }

        let vectors = Array2::from_shape_vec((ids.len(), dimension), flat)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;

        Ok(Self {
            dimension,
            ids,
            vectors,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Up to `top_k` entries ordered by ascending squared L2 distance.
    /// Equal distances keep catalog order.
    pub fn query(&self, embedding: &[f32], top_k: usize) -> Result<SearchHits, IndexError> {
        if embedding.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if self.is_empty() || top_k == 0 {
            return Ok(SearchHits::empty(Metric::L2Squared));
        }

        let query = ArrayView1::from(embedding);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let distance = row
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>();
                (i, distance)
            })
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        let hits = scored
            .into_iter()
            .map(|(i, distance)| Hit {
                id: self.ids[i].clone(),
                score: distance,
            })
            .collect();

        Ok(SearchHits {
            metric: Metric::L2Squared,
            hits,
        })
    }

    /// Serialize to the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let id_bytes: usize = self.ids.iter().map(|id| 4 + id.len()).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + id_bytes + self.vectors.len() * 4);

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        for id in &self.ids {
            out.extend_from_slice(&(id.len() as u32).to_le_bytes());
            out.extend_from_slice(id.as_bytes());
        }
        for value in self.vectors.iter() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Parse and validate the on-disk format.
    ///
    /// Rejects bad magic, unknown versions, a dimension other than
    /// `expected_dimension`, truncated or trailing data, and duplicate ids.
    pub fn from_bytes(bytes: &[u8], expected_dimension: usize) -> Result<Self, IndexError> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(4)? != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        let dimension = reader.u32()? as usize;
        if dimension == 0 {
            return Err(IndexError::Corrupt("dimension is zero".into()));
        }
        if dimension != expected_dimension {
            return Err(IndexError::DimensionMismatch {
                expected: expected_dimension,
                actual: dimension,
            });
        }
        let count = usize::try_from(reader.u64()?)
            .map_err(|_| IndexError::Corrupt("entry count overflows".into()))?;

        // Every id costs at least its 4-byte length prefix.
        if count > reader.remaining() / 4 {
            return Err(IndexError::Corrupt(format!(
                "entry count {count} exceeds file size"
            )));
        }

        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let len = reader.u32()? as usize;
            let raw = reader.take(len)?;
            let id = std::str::from_utf8(raw)
                .map_err(|_| IndexError::Corrupt(format!("id #{i} is not UTF-8")))?;
            ids.push(id.to_string());
        }

        let expected_floats = count
            .checked_mul(dimension)
            .ok_or_else(|| IndexError::Corrupt("vector block size overflows".into()))?;
        if reader.remaining() != expected_floats * 4 {
            return Err(IndexError::Corrupt(format!(
                "vector block is {} bytes, expected {} ({count} x {dimension} f32)",
                reader.remaining(),
                expected_floats * 4
            )));
        }

        let flat: Vec<f32> = reader
            .rest()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::Corrupt("vector block contains non-finite values".into()));
        }

        let entries = ids
            .into_iter()
            .zip(flat.chunks_exact(dimension))
            .map(|(id, v)| IndexEntry {
                id,
                embedding: v.to_vec(),
            });

        Self::build(dimension, entries).map_err(|e| match e {
            IndexError::DuplicateId(id) => IndexError::Corrupt(format!("duplicate id {id}")),
            other => other,
        })
    }

    /// Write the index atomically (temp file + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, self.to_bytes())?;
        std::fs::rename(&tmp_path, path)?;

        tracing::info!(
            path = %path.display(),
            entries = self.len(),
            dimension = self.dimension,
            "index saved"
        );
        Ok(())
    }

    /// Read and validate an index file.
    pub fn load(path: impl AsRef<Path>, expected_dimension: usize) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let index = Self::from_bytes(&bytes, expected_dimension)?;
        tracing::info!(
            path = %path.display(),
            entries = index.len(),
            dimension = index.dimension,
            "index loaded"
        );
        Ok(index)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| IndexError::Corrupt(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
