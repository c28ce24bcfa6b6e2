//! In-process stand-in for the parts of the Qdrant REST API imsearch uses.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
pub struct Collection {
    pub size: usize,
    /// point id -> (vector, payload)
    pub points: BTreeMap<String, (Vec<f32>, Value)>,
}

#[derive(Clone, Default)]
pub struct MockQdrant {
    pub collections: Arc<Mutex<BTreeMap<String, Collection>>>,
    pub search_delay: Option<Duration>,
}

impl MockQdrant {
    pub fn with_collection(self, name: &str, size: usize) -> Self {
        self.collections.lock().unwrap().insert(
            name.to_string(),
            Collection {
                size,
                points: BTreeMap::new(),
            },
        );
        self
    }

    pub fn points_count(&self, name: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |c| c.points.len())
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/collections/{name}", get(info).put(create))
            .route("/collections/{name}/points", put(upsert))
            .route("/collections/{name}/points/delete", post(delete))
            .route("/collections/{name}/points/search", post(search))
            .with_state(self)
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": { "error": "Not found: Collection doesn't exist!" } })),
    )
        .into_response()
}

async fn info(State(mock): State<MockQdrant>, Path(name): Path<String>) -> Response {
    let collections = mock.collections.lock().unwrap();
    match collections.get(&name) {
        None => not_found(),
        Some(c) => Json(json!({
            "result": {
                "status": "green",
                "points_count": c.points.len(),
                "config": { "params": { "vectors": { "size": c.size, "distance": "Cosine" } } }
            }
        }))
        .into_response(),
    }
}

async fn create(
    State(mock): State<MockQdrant>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let size = body["vectors"]["size"].as_u64().unwrap_or(0) as usize;
    mock.collections.lock().unwrap().insert(
        name,
        Collection {
            size,
            points: BTreeMap::new(),
        },
    );
    Json(json!({ "result": true })).into_response()
}

async fn upsert(
    State(mock): State<MockQdrant>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut collections = mock.collections.lock().unwrap();
    let Some(c) = collections.get_mut(&name) else {
        return not_found();
    };
    for point in body["points"].as_array().cloned().unwrap_or_default() {
        let id = point["id"].as_str().unwrap_or_default().to_string();
        let vector: Vec<f32> = serde_json::from_value(point["vector"].clone()).unwrap_or_default();
        if vector.len() != c.size {
            return (StatusCode::BAD_REQUEST, "wrong vector size").into_response();
        }
        c.points.insert(id, (vector, point["payload"].clone()));
    }
    Json(json!({ "result": { "status": "completed" } })).into_response()
}

async fn delete(
    State(mock): State<MockQdrant>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut collections = mock.collections.lock().unwrap();
    let Some(c) = collections.get_mut(&name) else {
        return not_found();
    };
    for id in body["points"].as_array().cloned().unwrap_or_default() {
        if let Some(id) = id.as_str() {
            c.points.remove(id);
        }
    }
    Json(json!({ "result": { "status": "completed" } })).into_response()
}

async fn search(
    State(mock): State<MockQdrant>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(delay) = mock.search_delay {
        tokio::time::sleep(delay).await;
    }
    let query: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap_or_default();
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;

    let collections = mock.collections.lock().unwrap();
    let Some(c) = collections.get(&name) else {
        return not_found();
    };
    let mut scored: Vec<(String, f32, Value)> = c
        .points
        .iter()
        .map(|(id, (v, payload))| (id.clone(), cosine(&query, v), payload.clone()))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);

    let result: Vec<Value> = scored
        .into_iter()
        .map(|(id, score, payload)| json!({ "id": id, "version": 1, "score": score, "payload": payload }))
        .collect();
    Json(json!({ "result": result, "status": "ok", "time": 0.001 })).into_response()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
