//! Local ONNX Runtime embedder.
//!
//! Implements [`ImageEmbedder`] with an ONNX export of the CNN run in-process
//! via `ort`. The forward pass runs on tokio's blocking pool.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use super::{check_dimension, preprocess, EmbedderKind, ImageEmbedder};
use crate::config::ImsearchConfig;
use crate::error::EmbedError;

/// In-process embedder backed by an ONNX Runtime session.
pub struct LocalEmbedder {
    inner: Arc<Inner>,
}

struct Inner {
    session: Mutex<Session>,
    input_size: u32,
    dimension: usize,
}

impl LocalEmbedder {
    pub fn new(config: &ImsearchConfig) -> Result<Self> {
        let model_path = config.resolved_model_path();

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `imsearch model download` first.",
            model_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.embedding.intra_threads)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let inner = Inner {
            session: Mutex::new(session),
            input_size: config.embedding.input_size,
            dimension: config.embedding.dimension,
        };

        // Probe with a blank image so a wrong export fails at startup.
        let side = inner.input_size as usize;
        let probe = inner
            .forward(Array4::<f32>::zeros((1, 3, side, side)))
            .context("model probe failed")?;
        tracing::info!(dimension = probe.len(), "ONNX model output verified");

        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

impl Inner {
    fn embed(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let pixels = preprocess::preprocess(bytes, self.input_size)?;
        self.forward(pixels)
    }

    fn forward(&self, pixels: Array4<f32>) -> Result<Vec<f32>, EmbedError> {
        let shape: Vec<i64> = pixels.shape().iter().map(|&d| d as i64).collect();
        let data = preprocess::flatten(&pixels);
        let input = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| EmbedError::Unavailable(format!("failed to build input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedError::Unavailable(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| EmbedError::Unavailable(format!("inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Unavailable(format!("failed to extract output tensor: {e}")))?;

        check_dimension(data.to_vec(), self.dimension)
    }
}

#[async_trait]
impl ImageEmbedder for LocalEmbedder {
    fn kind(&self) -> EmbedderKind {
        EmbedderKind::Local
    }

    fn dimensions(&self) -> usize {
        self.inner.dimension
    }

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        if image.is_empty() {
            return Err(EmbedError::Input("image is empty".into()));
        }

        let inner = Arc::clone(&self.inner);
        let bytes = image.to_vec();
        tokio::task::spawn_blocking(move || inner.embed(&bytes))
            .await
            .map_err(|e| EmbedError::Unavailable(format!("embedding task failed: {e}")))?
    }
}
