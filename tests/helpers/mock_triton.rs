//! In-process stand-in for the KServe v2 endpoints of a Triton server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::DIM;

pub const INPUT_SIZE: u32 = 16;

/// Behaviour knobs for the mock inference server.
#[derive(Clone)]
pub struct MockTriton {
    pub declared_dim: i64,
    pub returned_dim: usize,
    pub status: StatusCode,
    pub delay: Option<Duration>,
    pub infer_calls: Arc<AtomicUsize>,
}

impl Default for MockTriton {
    fn default() -> Self {
        Self {
            declared_dim: DIM as i64,
            returned_dim: DIM,
            status: StatusCode::OK,
            delay: None,
            infer_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockTriton {
    pub fn router(self) -> Router {
        Router::new()
            .route("/v2/models/{model}", get(metadata))
            .route("/v2/models/{model}/infer", post(infer))
            .with_state(self)
    }

    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }
}

async fn metadata(State(mock): State<MockTriton>, Path(model): Path<String>) -> Json<Value> {
    Json(json!({
        "name": model,
        "platform": "pytorch_libtorch",
        "inputs": [{ "name": "input__0", "datatype": "FP32", "shape": [-1, 3, INPUT_SIZE, INPUT_SIZE] }],
        "outputs": [{ "name": "output__0", "datatype": "FP32", "shape": [-1, mock.declared_dim] }]
    }))
}

/// Echoes a pooled summary of the input so the same image yields the same vector.
async fn infer(State(mock): State<MockTriton>, Json(body): Json<Value>) -> Response {
    mock.infer_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = mock.delay {
        tokio::time::sleep(delay).await;
    }
    if mock.status != StatusCode::OK {
        return (mock.status, "model failure").into_response();
    }

    let input = &body["inputs"][0];
    let shape: Vec<u64> = serde_json::from_value(input["shape"].clone()).unwrap_or_default();
    if shape != [1, 3, INPUT_SIZE as u64, INPUT_SIZE as u64] || input["datatype"] != "FP32" {
        return (StatusCode::BAD_REQUEST, "unexpected input tensor").into_response();
    }
    let data: Vec<f32> = serde_json::from_value(input["data"].clone()).unwrap_or_default();
    let chunk = (data.len() / mock.returned_dim).max(1);
    let output: Vec<f32> = (0..mock.returned_dim)
        .map(|i| data.iter().skip(i * chunk).take(chunk).sum::<f32>() / chunk as f32)
        .collect();

    Json(json!({
        "model_name": "efficientnet_b3",
        "outputs": [{ "name": "output__0", "datatype": "FP32", "shape": [1, mock.returned_dim], "data": output }]
    }))
    .into_response()
}
