//! Remote embedder backed by a Triton / KServe v2 inference server.
//!
//! The image is preprocessed locally on the blocking pool (same transform as
//! the ONNX embedder) and the tensor is posted to `/v2/models/{model}/infer`
//! as JSON.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{check_dimension, preprocess, EmbedderKind, ImageEmbedder};
use crate::config::ImsearchConfig;
use crate::error::EmbedError;

/// Embedder that delegates the forward pass to an inference server.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    base_url: String,
    model: String,
    input_name: String,
    output_name: String,
    input_size: u32,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    inputs: Vec<InferInput<'a>>,
    outputs: Vec<RequestedOutput<'a>>,
}

#[derive(Debug, Serialize)]
struct InferInput<'a> {
    name: &'a str,
    shape: Vec<usize>,
    datatype: &'static str,
    data: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct RequestedOutput<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    outputs: Vec<InferOutput>,
}

#[derive(Debug, Deserialize)]
struct InferOutput {
    name: String,
    #[serde(default)]
    data: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ModelMetadata {
    #[serde(default)]
    outputs: Vec<TensorMetadata>,
}

#[derive(Debug, Deserialize)]
struct TensorMetadata {
    name: String,
    #[serde(default)]
    shape: Vec<i64>,
}

impl RemoteEmbedder {
    /// Build the client and verify the served model's output dimension.
    pub async fn connect(config: &ImsearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.inference.timeout_ms))
            .build()
            .context("failed to create HTTP client for inference server")?;

        let embedder = Self {
            client,
            base_url: config.inference.url.trim_end_matches('/').to_string(),
            model: config.inference.model.clone(),
            input_name: config.inference.input_name.clone(),
            output_name: config.inference.output_name.clone(),
            input_size: config.embedding.input_size,
            dimension: config.embedding.dimension,
        };

        embedder.verify_model().await?;
        Ok(embedder)
    }

    async fn verify_model(&self) -> Result<()> {
        let url = format!("{}/v2/models/{}", self.base_url, self.model);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("inference server unreachable at {url}"))?;

        if !response.status().is_success() {
            bail!(
                "inference server returned HTTP {} for model '{}'",
                response.status(),
                self.model
            );
        }

        let metadata: ModelMetadata = response
            .json()
            .await
            .context("malformed model metadata from inference server")?;

        let output = metadata
            .outputs
            .iter()
            .find(|o| o.name == self.output_name)
            .or_else(|| metadata.outputs.first())
            .with_context(|| format!("model '{}' declares no outputs", self.model))?;

        match output.shape.last() {
            Some(&dim) if dim > 0 && dim as usize != self.dimension => bail!(
                "model '{}' output '{}' has dimension {dim}, configured embedding.dimension is {}",
                self.model,
                output.name,
                self.dimension
            ),
            Some(&dim) if dim > 0 => {}
            _ => tracing::warn!(
                model = %self.model,
                shape = ?output.shape,
                "model output dimension is dynamic, checking per request"
            ),
        }

        tracing::info!(
            url = %self.base_url,
            model = %self.model,
            dimension = self.dimension,
            "inference server ready"
        );
        Ok(())
    }
}

#[async_trait]
impl ImageEmbedder for RemoteEmbedder {
    fn kind(&self) -> EmbedderKind {
        EmbedderKind::Remote
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let bytes = image.to_vec();
        let size = self.input_size;
        let pixels = tokio::task::spawn_blocking(move || preprocess::preprocess(&bytes, size))
            .await
            .map_err(|e| EmbedError::Unavailable(format!("preprocessing task failed: {e}")))??;
        let request = InferRequest {
            inputs: vec![InferInput {
                name: &self.input_name,
                shape: pixels.shape().to_vec(),
                datatype: "FP32",
                data: preprocess::flatten(&pixels),
            }],
            outputs: vec![RequestedOutput {
                name: &self.output_name,
            }],
        };

        let url = format!("{}/v2/models/{}/infer", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("inference request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Unavailable(format!(
                "inference server rejected the request: {body}"
            )));
        }
        if !status.is_success() {
            return Err(EmbedError::Unavailable(format!(
                "inference server returned HTTP {status}"
            )));
        }

        let body: InferResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("malformed inference response: {e}")))?;

        let output = body
            .outputs
            .into_iter()
            .find(|o| o.name == self.output_name)
            .ok_or_else(|| {
                EmbedError::Unavailable(format!(
                    "inference response has no output '{}'",
                    self.output_name
                ))
            })?;

        check_dimension(output.data, self.dimension)
    }
}
