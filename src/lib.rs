//! Content-based image search.
//!
//! Given an uploaded image, imsearch returns the most visually similar items
//! from a product catalog. An image is turned into a fixed-length embedding by
//! one of two interchangeable backends, and the embedding is matched against
//! one of two interchangeable catalog indexes:
//!
//! | Concern | Local | Remote |
//! |---------|-------|--------|
//! | Embedding | ONNX Runtime (EfficientNet-B3, 1000 dims) | KServe v2 inference server (Triton) |
//! | Index | Exact flat L2 scan over an in-memory snapshot | Qdrant collection (cosine) |
//!
//! Catalog display metadata lives in SQLite and is joined onto index hits
//! after ranking.
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`embedding`]: image preprocessing and the embedding backends
//! - [`index`]: the local flat index and the Qdrant backend
//! - [`catalog`]: catalog metadata store and build manifests
//! - [`search`]: the search orchestrator and result mapper
//! - [`indexing`]: offline catalog builds
//! - [`server`]: the axum HTTP service

pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod indexing;
pub mod search;
pub mod server;
